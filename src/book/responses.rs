use crate::config::FieldAliases;
use crate::execution::ExecutionRecord;
use crate::merge::{as_flag, event_key, first_string, merge_by_key};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// 生成响应记录（区别于章节）
///
/// 同一节点可能先后出现 live 版本和最终版本，合并后只保留一条
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedResponse {
    pub key: String,
    pub label: String,
    pub content: String,
    pub node_id: Option<String>,
    pub provider_name: Option<String>,
    pub tokens: u64,
    pub is_live: bool,
}

fn live_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*\(live\)\s*$").expect("live suffix pattern"))
}

/// 去掉标签末尾的 "(Live)"
pub fn strip_live_suffix(label: &str) -> String {
    live_suffix_regex().replace(label, "").trim().to_string()
}

/// 从标题派生键：小写字母数字，其余折叠为 `-`
fn slug(title: &str) -> String {
    let mut out = String::new();
    for c in strip_live_suffix(title).to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn response_from_output(obj: &Map<String, Value>, raw: &Value, aliases: &FieldAliases) -> Option<GeneratedResponse> {
    let content = ["content", "text", "output", "response", "generatedText"]
        .iter()
        .find_map(|f| obj.get(*f).and_then(Value::as_str))
        .unwrap_or("")
        .to_string();
    let label = first_string(obj, &aliases.node_name).unwrap_or_default();
    let node_id = first_string(obj, &["nodeId".to_string(), "node_id".to_string()]);

    if content.trim().is_empty() && label.trim().is_empty() {
        return None;
    }

    // nodeId ?? id ?? 标题派生
    let key = node_id
        .clone()
        .or_else(|| first_string(obj, &["id".to_string()]))
        .or_else(|| Some(slug(&label)).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| event_key(raw));

    let is_live = aliases
        .live_markers
        .iter()
        .filter_map(|m| obj.get(m))
        .any(as_flag)
        || live_suffix_regex().is_match(&label);

    Some(GeneratedResponse {
        key,
        label,
        content,
        node_id,
        provider_name: first_string(obj, &aliases.provider_name),
        tokens: obj.get("tokens").and_then(Value::as_u64).unwrap_or(0),
        is_live,
    })
}

/// 合并同键的两条响应：非 live 版本的字段优先，缺失时用另一条补齐
fn merge_responses(first: GeneratedResponse, second: GeneratedResponse) -> GeneratedResponse {
    let (preferred, other) = if first.is_live && !second.is_live {
        (second, first)
    } else if !first.is_live && second.is_live {
        (first, second)
    } else {
        // 同为 live 或同为最终版本时，较新的一条优先
        (second, first)
    };

    let pick = |a: String, b: String| if a.trim().is_empty() { b } else { a };

    GeneratedResponse {
        key: preferred.key,
        label: pick(preferred.label, other.label),
        content: pick(preferred.content, other.content),
        node_id: preferred.node_id.or(other.node_id),
        provider_name: preferred.provider_name.or(other.provider_name),
        tokens: if preferred.tokens > 0 { preferred.tokens } else { other.tokens },
        is_live: preferred.is_live && other.is_live,
    }
}

/// 收集并去重生成响应
///
/// 来源为 AI 输出与有文本的节点结果（节点结果视为最终版本）
pub fn collect_responses(record: &ExecutionRecord, aliases: &FieldAliases) -> Vec<GeneratedResponse> {
    let from_outputs = record
        .ai_outputs
        .iter()
        .filter_map(|raw| raw.as_object().and_then(|obj| response_from_output(obj, raw, aliases)));

    let from_nodes = record.node_results.iter().filter_map(|node| {
        let content = node.text()?.to_string();
        Some(GeneratedResponse {
            key: node.node_id.clone(),
            label: node.node_name.clone(),
            content,
            node_id: Some(node.node_id.clone()),
            provider_name: Some(node.provider_name.clone()).filter(|p| !p.is_empty()),
            tokens: node.tokens,
            is_live: false,
        })
    });

    merge_by_key(from_outputs, from_nodes, |r| r.key.clone(), merge_responses)
        .into_iter()
        .map(|mut response| {
            response.label = strip_live_suffix(&response.label);
            response
        })
        .collect()
}
