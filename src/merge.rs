use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// 按派生键去重
///
/// 保留每个键的第一次出现，维持原始顺序
pub fn dedup_by_key<T, K, F>(items: impl IntoIterator<Item = T>, mut key_fn: F) -> Vec<T>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for item in items {
        if seen.insert(key_fn(&item)) {
            result.push(item);
        }
    }

    result
}

/// 按派生键合并两个序列
///
/// 结果先按 `primary` 的顺序排列，再追加仅存在于 `secondary` 的元素。
/// 两边都有的键交给 `merge_fn(primary_item, secondary_item)` 合并。
///
/// # 参数
/// - `primary`: 主序列
/// - `secondary`: 次序列
/// - `key_fn`: 键派生函数
/// - `merge_fn`: 冲突合并函数
pub fn merge_by_key<T, K, F, M>(
    primary: impl IntoIterator<Item = T>,
    secondary: impl IntoIterator<Item = T>,
    mut key_fn: F,
    mut merge_fn: M,
) -> Vec<T>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
    M: FnMut(T, T) -> T,
{
    let mut result: Vec<Option<T>> = Vec::new();
    let mut index: HashMap<K, usize> = HashMap::new();

    for item in primary {
        let key = key_fn(&item);
        match index.get(&key) {
            Some(&pos) => {
                // 主序列内部重复，同样合并
                if let Some(existing) = result[pos].take() {
                    result[pos] = Some(merge_fn(existing, item));
                }
            }
            None => {
                index.insert(key, result.len());
                result.push(Some(item));
            }
        }
    }

    for item in secondary {
        let key = key_fn(&item);
        match index.get(&key) {
            Some(&pos) => {
                if let Some(existing) = result[pos].take() {
                    result[pos] = Some(merge_fn(existing, item));
                }
            }
            None => {
                index.insert(key, result.len());
                result.push(Some(item));
            }
        }
    }

    result.into_iter().flatten().collect()
}

/// 判断 JSON 值是否为空（null、空字符串、空数组、空对象）
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// 默认合并策略：优先取 `primary` 的非空字段，缺失时回退到 `secondary`
///
/// 只对对象做逐字段合并，其余类型整体取舍
pub fn prefer_non_empty(primary: &Value, secondary: &Value) -> Value {
    match (primary, secondary) {
        (Value::Object(p), Value::Object(s)) => {
            let mut merged = s.clone();
            for (key, value) in p {
                if !is_empty_value(value) || !merged.contains_key(key) {
                    merged.insert(key.clone(), value.clone());
                }
            }
            // 保持 primary 的字段顺序在前
            let mut ordered = Map::new();
            for key in p.keys().chain(s.keys()) {
                if let Some(value) = merged.remove(key) {
                    ordered.insert(key.clone(), value);
                }
            }
            Value::Object(ordered)
        }
        _ if is_empty_value(primary) => secondary.clone(),
        _ => primary.clone(),
    }
}

/// 浅层右偏合并：`overlay` 的非空键覆盖 `base`
pub fn merge_objects(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in overlay {
        if !is_empty_value(value) || !merged.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// 把任意值视为序列，非数组视为空
pub fn as_sequence(value: Option<&Value>) -> &[Value] {
    match value {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

/// 按别名顺序取第一个非空字段
pub fn first_present<'a>(obj: &'a Map<String, Value>, aliases: &[String]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| obj.get(alias))
        .find(|value| !is_empty_value(value))
}

/// 按别名顺序取第一个非空字符串字段（数字也会转成字符串）
pub fn first_string(obj: &Map<String, Value>, aliases: &[String]) -> Option<String> {
    aliases.iter().filter_map(|alias| obj.get(alias)).find_map(|value| match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// 按别名顺序取第一个非空对象字段
pub fn first_object<'a>(
    obj: &'a Map<String, Value>,
    aliases: &[String],
) -> Option<&'a Map<String, Value>> {
    aliases
        .iter()
        .filter_map(|alias| obj.get(alias))
        .find_map(|value| value.as_object().filter(|m| !m.is_empty()))
}

/// 宽松的正整数解析：数字、数字字符串、"Chapter 3" 之类的文本
pub fn as_positive_int(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u32::try_from(u).ok().filter(|&v| v > 0)
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 1.0 && *f <= u32::MAX as f64)
                    .map(|f| f as u32)
            }
        }
        Value::String(s) => {
            let digits: String = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<u32>().ok().filter(|&v| v > 0)
        }
        _ => None,
    }
}

/// 宽松的布尔解析
pub fn as_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// 为事件类记录（AI 输出、处理步骤）派生去重键
///
/// 显式 id 优先，其次节点 ID + 时间戳，最后退化为规范化 JSON 文本
pub fn event_key(value: &Value) -> String {
    let Some(obj) = value.as_object() else {
        return value.to_string();
    };

    for id_field in ["id", "eventId", "event_id", "outputId", "output_id"] {
        if let Some(id) = obj.get(id_field).and_then(scalar_text) {
            return format!("id:{}", id);
        }
    }

    let node = ["nodeId", "node_id", "stepId", "step_id"]
        .iter()
        .find_map(|f| obj.get(*f).and_then(scalar_text));
    let stamp = ["timestamp", "startedAt", "started_at", "createdAt", "created_at"]
        .iter()
        .find_map(|f| obj.get(*f).and_then(scalar_text));

    match (node, stamp) {
        (Some(node), Some(stamp)) => format!("node:{}@{}", node, stamp),
        _ => format!("raw:{}", value),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
