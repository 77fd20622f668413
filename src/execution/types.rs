use crate::config::FieldAliases;
use crate::merge::{as_sequence, first_present, first_string, is_empty_value, merge_objects};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// 解析显式状态字符串，兼容两套 schema 的写法
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "pending" | "queued" | "waiting" | "created" => Some(Self::Pending),
            "running" | "in_progress" | "in-progress" | "processing" | "started" | "streaming" => {
                Some(Self::Running)
            }
            "completed" | "complete" | "success" | "succeeded" | "done" | "finished" => {
                Some(Self::Completed)
            }
            "failed" | "failure" | "error" | "errored" => Some(Self::Failed),
            "cancelled" | "canceled" | "aborted" | "stopped" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// 节点结果
///
/// 工作流图中单个节点的输出
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub node_name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// 字符串或结构化内容
    pub content: Value,
    pub tokens: u64,
    pub words: u64,
    pub provider_name: String,
    pub metadata: Map<String, Value>,
    /// 多章节节点的子章节列表
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chapters: Vec<Value>,
    /// 编译节点的结构化段落列表
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Value>,
}

impl NodeResult {
    /// 从原始 JSON 构建节点结果
    ///
    /// # 参数
    /// - `key`: 该节点在结果表中的稳定键
    /// - `value`: 原始节点数据
    /// - `aliases`: 字段别名表
    pub fn from_value(key: &str, value: &Value, aliases: &FieldAliases) -> Self {
        let Some(obj) = value.as_object() else {
            // 裸字符串等非对象值直接作为内容
            return Self {
                node_id: key.to_string(),
                content: if is_empty_value(value) { Value::Null } else { value.clone() },
                ..Self::default()
            };
        };

        let content = first_present(obj, &aliases.node_content)
            .cloned()
            .unwrap_or(Value::Null);

        // sections 可能直接挂在节点上，也可能嵌在结构化 content 里
        let sections = aliases
            .sections
            .iter()
            .find_map(|alias| {
                obj.get(alias)
                    .or_else(|| content.as_object().and_then(|c| c.get(alias)))
                    .and_then(Value::as_array)
                    .filter(|items| !items.is_empty())
            })
            .cloned()
            .unwrap_or_default();

        let own_chapters = as_sequence(obj.get("chapters"));
        let chapters = if own_chapters.is_empty() {
            as_sequence(content.as_object().and_then(|c| c.get("chapters"))).to_vec()
        } else {
            own_chapters.to_vec()
        };

        Self {
            node_id: key.to_string(),
            node_name: first_string(obj, &aliases.node_name).unwrap_or_default(),
            node_type: first_string(obj, &aliases.node_type).unwrap_or_default(),
            content,
            tokens: first_count(obj, &aliases.node_tokens),
            words: first_count(obj, &aliases.node_words),
            provider_name: first_string(obj, &aliases.provider_name).unwrap_or_default(),
            metadata: obj
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            chapters,
            sections,
        }
    }

    /// 用较新的同键节点结果更新自身
    ///
    /// 只有非空字段会覆盖，空值永远不会抹掉已解析的字段
    pub fn merge_from(&mut self, later: NodeResult) {
        fn take(target: &mut String, incoming: String) {
            if !incoming.trim().is_empty() {
                *target = incoming;
            }
        }

        take(&mut self.node_name, later.node_name);
        take(&mut self.node_type, later.node_type);
        take(&mut self.provider_name, later.provider_name);
        if !is_empty_value(&later.content) {
            self.content = later.content;
        }
        if later.tokens > 0 {
            self.tokens = later.tokens;
        }
        if later.words > 0 {
            self.words = later.words;
        }
        self.metadata = merge_objects(&self.metadata, &later.metadata);
        if !later.chapters.is_empty() {
            self.chapters = later.chapters;
        }
        if !later.sections.is_empty() {
            self.sections = later.sections;
        }
    }

    /// 节点的文本内容
    ///
    /// 字符串内容直接返回；结构化内容尝试常见的文本字段
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
            Value::Object(obj) => ["content", "text", "output", "chapter_content", "chapterContent"]
                .iter()
                .filter_map(|field| obj.get(*field))
                .find_map(|v| v.as_str().filter(|s| !s.trim().is_empty())),
            _ => None,
        }
    }

    /// 节点名与类型的小写拼接，供启发式标记匹配
    pub fn label(&self) -> String {
        format!("{} {} {}", self.node_name, self.node_type, self.node_id).to_lowercase()
    }

    /// 名称或类型是否包含任一标记
    pub fn has_marker(&self, markers: &[String]) -> bool {
        let label = self.label();
        markers.iter().any(|m| label.contains(&m.to_lowercase()))
    }
}

fn first_count(obj: &Map<String, Value>, aliases: &[String]) -> u64 {
    aliases
        .iter()
        .filter_map(|alias| obj.get(alias))
        .find_map(|value| match value {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
        .unwrap_or(0)
}

/// 有序、键唯一的节点结果表
///
/// 序列化为以节点 ID 为键的对象，保持插入顺序
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeResults {
    entries: Vec<NodeResult>,
}

impl NodeResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入节点；键已存在时按 `merge_from` 合并
    pub fn insert_or_merge(&mut self, node: NodeResult) {
        match self.entries.iter_mut().find(|n| n.node_id == node.node_id) {
            Some(existing) => existing.merge_from(node),
            None => self.entries.push(node),
        }
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeResult> {
        self.entries.iter().find(|n| n.node_id == node_id)
    }

    pub fn contains_key(&self, node_id: &str) -> bool {
        self.get(node_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeResult> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|n| n.node_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for NodeResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for node in &self.entries {
            map.serialize_entry(&node.node_id, node)?;
        }
        map.end()
    }
}

/// 规范化后的执行记录
///
/// 每次遥测更新都会重新计算，本模块不负责持久化
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: Option<String>,
    pub status: ExecutionStatus,
    /// 0 ~ 100
    pub progress: f64,
    pub current_node_id: Option<String>,
    pub failed_node_id: Option<String>,
    pub error: Option<String>,
    pub node_results: NodeResults,
    /// 执行顺序
    pub processing_steps: Vec<Value>,
    pub ai_outputs: Vec<Value>,
    pub story_context: Map<String, Value>,
    pub user_input: Map<String, Value>,
    pub all_formats: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub chapter_info: Map<String, Value>,
    pub checkpoint_data: Option<Value>,
}

impl ExecutionRecord {
    /// 序列化为 JSON，可再次送入规范化器
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parse() {
        assert_eq!(ExecutionStatus::parse("Completed"), Some(ExecutionStatus::Completed));
        assert_eq!(ExecutionStatus::parse("canceled"), Some(ExecutionStatus::Cancelled));
        assert_eq!(ExecutionStatus::parse("in_progress"), Some(ExecutionStatus::Running));
        assert_eq!(ExecutionStatus::parse("mystery"), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExecutionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_node_result_from_value() {
        let aliases = FieldAliases::default();
        let raw = json!({
            "node_name": "Chapter Writer",
            "nodeType": "multi_chapter_generation",
            "output": "Chapter 1: Start",
            "tokenCount": 120,
            "provider": "openai",
            "chapters": [{"number": 1}]
        });

        let node = NodeResult::from_value("writer-1", &raw, &aliases);
        assert_eq!(node.node_id, "writer-1");
        assert_eq!(node.node_name, "Chapter Writer");
        assert_eq!(node.node_type, "multi_chapter_generation");
        assert_eq!(node.text(), Some("Chapter 1: Start"));
        assert_eq!(node.tokens, 120);
        assert_eq!(node.provider_name, "openai");
        assert_eq!(node.chapters.len(), 1);
    }

    #[test]
    fn test_node_result_sections_in_content() {
        let aliases = FieldAliases::default();
        let raw = json!({
            "type": "final_output",
            "content": {"sections": [{"title": "One", "content": "x"}]}
        });

        let node = NodeResult::from_value("final", &raw, &aliases);
        assert_eq!(node.sections.len(), 1);
    }

    #[test]
    fn test_merge_from_never_regresses() {
        let aliases = FieldAliases::default();
        let mut node = NodeResult::from_value(
            "n1",
            &json!({"nodeName": "Writer", "content": "full text", "tokens": 50}),
            &aliases,
        );
        let later = NodeResult::from_value("n1", &json!({"content": "", "words": 2}), &aliases);

        node.merge_from(later);
        assert_eq!(node.node_name, "Writer");
        assert_eq!(node.text(), Some("full text"));
        assert_eq!(node.tokens, 50);
        assert_eq!(node.words, 2);
    }

    #[test]
    fn test_node_results_serialize_as_map() {
        let aliases = FieldAliases::default();
        let mut results = NodeResults::new();
        results.insert_or_merge(NodeResult::from_value("b", &json!({"content": "x"}), &aliases));
        results.insert_or_merge(NodeResult::from_value("a", &json!({"content": "y"}), &aliases));
        results.insert_or_merge(NodeResult::from_value("b", &json!({"content": "z"}), &aliases));

        assert_eq!(results.len(), 2);
        let value = serde_json::to_value(&results).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(value["b"]["content"], "z");
    }
}
