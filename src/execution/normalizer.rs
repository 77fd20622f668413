use super::shape::NodeResultsField;
use super::types::{ExecutionRecord, ExecutionStatus, NodeResult, NodeResults};
use crate::config::{FieldAliases, PipelineConfig};
use crate::merge::{
    as_sequence, event_key, first_object, first_present, first_string, is_empty_value,
    merge_by_key, merge_objects, prefer_non_empty,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// 执行状态规范化器
///
/// 把同一次执行的两份片段（嵌套 `executionData` 版与扁平版）合并为一份
/// `ExecutionRecord`。后一个片段的非空值覆盖前一个，空值永远不会抹掉已有字段。
pub struct ExecutionStateNormalizer {
    aliases: FieldAliases,
}

impl ExecutionStateNormalizer {
    pub fn new() -> Self {
        Self::with_config(&PipelineConfig::default())
    }

    pub fn with_config(config: &PipelineConfig) -> Self {
        Self {
            aliases: config.aliases.clone(),
        }
    }

    /// 合并两份片段
    ///
    /// # 参数
    /// - `raw_a`: 较早的片段（可为 null）
    /// - `raw_b`: 较新的片段（可为 null）
    ///
    /// # 返回
    /// 规范化后的执行记录，永不失败
    pub fn normalize(&self, raw_a: &Value, raw_b: &Value) -> ExecutionRecord {
        // 由旧到新：A 顶层、A 嵌套、B 顶层、B 嵌套
        let layers: Vec<Map<String, Value>> = [raw_a, raw_b]
            .into_iter()
            .flat_map(|raw| self.fragment_layers(raw))
            .collect();
        let aliases = &self.aliases;

        let node_results = self.merge_node_results(&layers);

        let event_list = |field: &[String]| -> Vec<Value> {
            layers.iter().fold(Vec::new(), |merged, layer| {
                merge_event_lists(&merged, as_sequence(first_present(layer, field)))
            })
        };

        let merge_field = |field: &[String]| -> Map<String, Value> {
            layers.iter().fold(Map::new(), |merged, layer| match first_object(layer, field) {
                Some(obj) => merge_objects(&merged, obj),
                None => merged,
            })
        };

        let latest_string = |field: &[String]| -> Option<String> {
            layers.iter().rev().find_map(|layer| first_string(layer, field))
        };

        let progress = self.resolve_progress(&layers);
        let error = layers.iter().rev().find_map(|layer| self.resolve_error(layer));
        let status = self.resolve_status(&layers, progress, error.is_some());

        let record = ExecutionRecord {
            execution_id: latest_string(&aliases.execution_id),
            status,
            progress,
            current_node_id: latest_string(&aliases.current_node_id),
            failed_node_id: latest_string(&aliases.failed_node_id),
            error,
            node_results,
            processing_steps: event_list(&aliases.processing_steps),
            ai_outputs: event_list(&aliases.ai_outputs),
            story_context: merge_field(&aliases.story_context),
            user_input: merge_field(&aliases.user_input),
            all_formats: merge_field(&aliases.all_formats),
            metadata: merge_field(&aliases.metadata),
            chapter_info: merge_field(&aliases.chapter_info),
            checkpoint_data: layers
                .iter()
                .rev()
                .find_map(|layer| first_present(layer, &aliases.checkpoint_data))
                .cloned(),
        };

        debug!(
            execution_id = record.execution_id.as_deref().unwrap_or("-"),
            status = ?record.status,
            nodes = record.node_results.len(),
            ai_outputs = record.ai_outputs.len(),
            "执行记录规范化完成"
        );

        record
    }

    /// 把单个片段拆成顶层与嵌套容器两层
    ///
    /// 同一片段里两层都出现的字段逐字段合并，嵌套层的非空值优先
    fn fragment_layers(&self, raw: &Value) -> Vec<Map<String, Value>> {
        let Some(obj) = raw.as_object() else {
            if !raw.is_null() {
                warn!("执行片段不是对象，按空对象处理");
            }
            return Vec::new();
        };

        let mut top = obj.clone();
        for container in &self.aliases.nested_container {
            top.remove(container);
        }

        let mut layers = vec![top];
        if let Some(nested) = first_object(obj, &self.aliases.nested_container) {
            layers.push(nested.clone());
        }
        layers
    }

    fn merge_node_results(&self, layers: &[Map<String, Value>]) -> NodeResults {
        let mut results = NodeResults::new();

        for layer in layers {
            let raw = self.aliases.node_results.iter().find_map(|alias| layer.get(alias));
            let field = match NodeResultsField::detect(raw) {
                Ok(field) => field,
                Err(e) => {
                    warn!("{}，忽略该层的节点结果", e);
                    NodeResultsField::Absent
                }
            };

            for (key, value) in field.entries(&self.aliases.node_id) {
                results.insert_or_merge(NodeResult::from_value(&key, value, &self.aliases));
            }
        }

        results
    }

    /// 进度取所有层中的最大值，避免较新的占位 0 让进度倒退
    fn resolve_progress(&self, layers: &[Map<String, Value>]) -> f64 {
        layers
            .iter()
            .filter_map(|layer| first_present(layer, &self.aliases.progress))
            .filter_map(|value| match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
                _ => None,
            })
            .filter(|p| p.is_finite())
            .fold(0.0_f64, |acc, p| acc.max(p.clamp(0.0, 100.0)))
    }

    fn resolve_error(&self, fragment: &Map<String, Value>) -> Option<String> {
        match first_present(fragment, &self.aliases.error)? {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(Value::Object(obj.clone()).to_string())),
            Value::Bool(false) => None,
            other => Some(other.to_string()),
        }
    }

    /// 状态回退阶梯
    ///
    /// 显式状态 → 有错误则 failed → 进度满或有完成标记则 completed → running
    fn resolve_status(&self, layers: &[Map<String, Value>], progress: f64, has_error: bool) -> ExecutionStatus {
        let explicit = layers.iter().rev().find_map(|layer| {
            self.aliases
                .status
                .iter()
                .filter_map(|alias| layer.get(alias).and_then(Value::as_str))
                .find_map(ExecutionStatus::parse)
        });
        if let Some(status) = explicit {
            return status;
        }

        if has_error {
            return ExecutionStatus::Failed;
        }

        let completed_marker = layers.iter().any(|layer| {
            self.aliases
                .completion_markers
                .iter()
                .filter_map(|alias| layer.get(alias))
                .any(|value| !is_empty_value(value) && *value != Value::Bool(false))
        });
        if progress >= 100.0 || completed_marker {
            return ExecutionStatus::Completed;
        }

        ExecutionStatus::Running
    }
}

impl Default for ExecutionStateNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// 事件列表按派生键去重合并，保持时间顺序，冲突时较新片段的非空字段优先
fn merge_event_lists(earlier: &[Value], later: &[Value]) -> Vec<Value> {
    merge_by_key(
        earlier.iter().cloned(),
        later.iter().cloned(),
        event_key,
        |existing, incoming| prefer_non_empty(&incoming, &existing),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(a: Value, b: Value) -> ExecutionRecord {
        ExecutionStateNormalizer::new().normalize(&a, &b)
    }

    #[test]
    fn test_missing_inputs_default() {
        let record = normalize(Value::Null, Value::Null);
        assert!(record.node_results.is_empty());
        assert!(record.ai_outputs.is_empty());
        assert_eq!(record.status, ExecutionStatus::Running);
        assert_eq!(record.progress, 0.0);
    }

    #[test]
    fn test_nested_and_flat_fragments() {
        let nested = json!({
            "executionData": {
                "executionId": "exec-1",
                "nodeResults": {"input": {"nodeName": "Input", "content": "params"}},
                "userInput": {"story_title": "Night Train"}
            }
        });
        let flat = json!({
            "node_results": [{"nodeId": "writer", "content": "Chapter 1: Start"}],
            "current_node_id": "writer",
            "userInput": {"genre": "noir"}
        });

        let record = normalize(nested, flat);
        assert_eq!(record.execution_id.as_deref(), Some("exec-1"));
        assert_eq!(record.current_node_id.as_deref(), Some("writer"));
        assert_eq!(record.node_results.len(), 2);
        assert!(record.node_results.contains_key("input"));
        assert!(record.node_results.contains_key("writer"));
        assert_eq!(record.user_input["story_title"], "Night Train");
        assert_eq!(record.user_input["genre"], "noir");
    }

    #[test]
    fn test_flat_and_nested_fields_in_same_fragment() {
        let mixed = json!({
            "nodeResults": {"flat_only": {"content": "top"}, "both": {"content": "top", "nodeName": "Writer"}},
            "aiOutputs": [{"id": "o1", "content": "a"}],
            "userInput": {"genre": "noir"},
            "executionData": {
                "nodeResults": {"nested_only": {"content": "inner"}, "both": {"content": "inner"}},
                "aiOutputs": [{"id": "o2", "content": "b"}],
                "userInput": {"story_title": "Night Train"}
            }
        });

        let record = normalize(mixed, Value::Null);
        let keys: Vec<&str> = record.node_results.keys().collect();
        assert_eq!(keys, vec!["flat_only", "both", "nested_only"]);
        let both = record.node_results.get("both").unwrap();
        assert_eq!(both.text(), Some("inner"));
        assert_eq!(both.node_name, "Writer");
        assert_eq!(record.ai_outputs.len(), 2);
        assert_eq!(record.user_input["genre"], "noir");
        assert_eq!(record.user_input["story_title"], "Night Train");
    }

    #[test]
    fn test_node_results_later_overwrites_non_empty_only() {
        let a = json!({"nodeResults": {"n1": {"content": "draft", "nodeName": "Writer"}}});
        let b = json!({"nodeResults": {"n1": {"content": "final", "nodeName": ""}}});

        let record = normalize(a, b);
        let node = record.node_results.get("n1").unwrap();
        assert_eq!(node.text(), Some("final"));
        assert_eq!(node.node_name, "Writer");
    }

    #[test]
    fn test_malformed_node_results_coerced() {
        let record = normalize(json!({"nodeResults": "garbage"}), json!({"nodeResults": 42}));
        assert!(record.node_results.is_empty());
    }

    #[test]
    fn test_ai_outputs_deduplicated() {
        let a = json!({"aiOutputs": [{"id": "o1", "content": ""}, {"id": "o2", "content": "b"}]});
        let b = json!({"aiOutputs": [{"id": "o1", "content": "a"}, {"id": "o3", "content": "c"}]});

        let record = normalize(a, b);
        assert_eq!(record.ai_outputs.len(), 3);
        assert_eq!(record.ai_outputs[0]["content"], "a");
        assert_eq!(record.ai_outputs[2]["id"], "o3");
    }

    #[test]
    fn test_status_ladder() {
        assert_eq!(normalize(json!({"status": "cancelled"}), Value::Null).status, ExecutionStatus::Cancelled);
        assert_eq!(normalize(json!({"error": "boom"}), Value::Null).status, ExecutionStatus::Failed);
        assert_eq!(normalize(json!({"progress": 100}), Value::Null).status, ExecutionStatus::Completed);
        assert_eq!(normalize(json!({"completedAt": "2024-01-01"}), Value::Null).status, ExecutionStatus::Completed);
        assert_eq!(normalize(json!({"progress": "40%"}), Value::Null).status, ExecutionStatus::Running);
        // 较新片段的显式状态优先
        assert_eq!(
            normalize(json!({"status": "running"}), json!({"state": "done"})).status,
            ExecutionStatus::Completed
        );
    }

    #[test]
    fn test_progress_never_regresses() {
        let record = normalize(json!({"progress": 80}), json!({"progress": 0}));
        assert_eq!(record.progress, 80.0);

        let record = normalize(json!({"progress": 250}), Value::Null);
        assert_eq!(record.progress, 100.0);
    }

    #[test]
    fn test_error_object_message() {
        let record = normalize(json!({"error": {"message": "node crashed", "code": 3}}), Value::Null);
        assert_eq!(record.error.as_deref(), Some("node crashed"));
        assert_eq!(record.status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_idempotent() {
        let a = json!({
            "executionData": {
                "executionId": "exec-9",
                "status": "running",
                "progress": 55,
                "nodeResults": [{"nodeId": "w", "content": "text", "tokens": 9}],
                "aiOutputs": [{"nodeId": "w", "timestamp": 1, "content": "x"}],
                "storyContext": {"title": "T"},
                "checkpointData": {"step": 3}
            }
        });
        let b = json!({"failedNodeId": "x", "processingSteps": [{"id": "s1"}, {"id": "s1"}]});

        let once = normalize(a, b);
        let twice = normalize(once.to_value(), json!({}));
        assert_eq!(once, twice);
    }
}
