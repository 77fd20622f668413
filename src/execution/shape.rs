use crate::error::PipelineError;
use serde_json::{Map, Value};

/// `nodeResults` 字段的几种形态
///
/// 在规范化边界一次性判定，后续逻辑不再做类型探测
#[derive(Debug, Clone, Copy)]
pub enum NodeResultsField<'a> {
    Map(&'a Map<String, Value>),
    List(&'a [Value]),
    Absent,
}

impl<'a> NodeResultsField<'a> {
    /// 判定字段形态
    ///
    /// null 视为缺失；字符串、数字等其他形态返回 `MalformedInput`
    pub fn detect(value: Option<&'a Value>) -> Result<Self, PipelineError> {
        match value {
            None | Some(Value::Null) => Ok(Self::Absent),
            Some(Value::Object(map)) => Ok(Self::Map(map)),
            Some(Value::Array(items)) => Ok(Self::List(items)),
            Some(other) => Err(PipelineError::malformed(
                "nodeResults",
                format!("既不是对象也不是数组: {}", type_name(other)),
            )),
        }
    }

    /// 展开为 (键, 值) 列表
    ///
    /// 列表形态的键：显式键 ?? nodeId ?? id ?? `node_{index}`
    pub fn entries(&self, id_aliases: &[String]) -> Vec<(String, &'a Value)> {
        match *self {
            Self::Absent => Vec::new(),
            Self::Map(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            Self::List(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| list_entry(index, item, id_aliases))
                .collect(),
        }
    }
}

fn list_entry<'a>(index: usize, item: &'a Value, id_aliases: &[String]) -> (String, &'a Value) {
    // [id, value] 二元组
    if let Value::Array(pair) = item {
        if let [Value::String(key), value] = pair.as_slice() {
            if !key.trim().is_empty() {
                return (key.clone(), value);
            }
        }
    }

    if let Value::Object(obj) = item {
        // { key, value } 包装
        if let (Some(Value::String(key)), Some(value)) = (obj.get("key"), obj.get("value")) {
            if !key.trim().is_empty() {
                return (key.clone(), value);
            }
        }

        for alias in id_aliases {
            match obj.get(alias) {
                Some(Value::String(id)) if !id.trim().is_empty() => return (id.clone(), item),
                Some(Value::Number(n)) => return (n.to_string(), item),
                _ => {}
            }
        }
    }

    (format!("node_{}", index), item)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id_aliases() -> Vec<String> {
        vec!["nodeId".to_string(), "id".to_string()]
    }

    #[test]
    fn test_detect_shapes() {
        let map = json!({"a": {}});
        let list = json!([{}]);
        assert!(matches!(NodeResultsField::detect(Some(&map)), Ok(NodeResultsField::Map(_))));
        assert!(matches!(NodeResultsField::detect(Some(&list)), Ok(NodeResultsField::List(_))));
        assert!(matches!(NodeResultsField::detect(None), Ok(NodeResultsField::Absent)));
        assert!(matches!(NodeResultsField::detect(Some(&Value::Null)), Ok(NodeResultsField::Absent)));

        let bad = json!("oops");
        let err = NodeResultsField::detect(Some(&bad)).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput { .. }));
    }

    #[test]
    fn test_list_entry_keys() {
        let list = json!([
            {"nodeId": "writer", "content": "a"},
            {"id": 7, "content": "b"},
            ["pair-key", {"content": "c"}],
            {"key": "wrapped", "value": {"content": "d"}},
            {"content": "e"}
        ]);

        let field = NodeResultsField::detect(Some(&list)).unwrap();
        let keys: Vec<String> = field.entries(&id_aliases()).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["writer", "7", "pair-key", "wrapped", "node_4"]);
    }

    #[test]
    fn test_map_entries_keep_order() {
        let map = json!({"z": {"content": 1}, "a": {"content": 2}});
        let field = NodeResultsField::detect(Some(&map)).unwrap();
        let keys: Vec<String> = field.entries(&id_aliases()).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }
}
