//! # Key 解析
//!
//! 原始 Key 文本支持三种格式：
//! - VertexAI 渠道：若干顶层 JSON 对象（服务账号凭证），按括号平衡抽取
//! - JSON 字符串数组：`["k1", "k2"]`
//! - 换行分隔，逐行去空白并跳过空行

/// VertexAI 渠道类型
pub const CHANNEL_TYPE_VERTEX_AI: i32 = 42;

/// 把原始 Key 文本解析为有序 Key 列表
pub fn parse_keys(channel_type: i32, raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if channel_type == CHANNEL_TYPE_VERTEX_AI {
        return extract_json_objects(trimmed);
    }

    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(keys) = serde_json::from_str::<Vec<String>>(trimmed) {
            return keys;
        }
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// 抽取文本中所有顶层 `{...}` 片段
///
/// 感知嵌套与字符串字面量（含转义），对象之间的任意字符被忽略，末尾未闭合的片段丢弃。
pub fn extract_json_objects(raw: &str) -> Vec<String> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (pos, ch) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(pos);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(begin) = start.take() {
                        objects.push(raw[begin..=pos].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    objects
}
