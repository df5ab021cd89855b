//! Имена каналов.
//!
//! Имя канала это `/seg(/seg)*`, где сегмент состоит из ASCII-букв, цифр
//! и символов `-_!~()$@`. Шаблон подписки это `(/seg)*/*` (ровно один
//! сегмент) или `(/seg)*/**` (любая глубина).

pub const HANDSHAKE: &str = "/meta/handshake";
pub const CONNECT: &str = "/meta/connect";
pub const DISCONNECT: &str = "/meta/disconnect";
pub const SUBSCRIBE: &str = "/meta/subscribe";
pub const UNSUBSCRIBE: &str = "/meta/unsubscribe";

const META: &str = "meta";
const SERVICE: &str = "service";
const MARKS: &[char] = &['-', '_', '!', '~', '(', ')', '$', '@'];

/// Разбивает имя канала на сегменты (без ведущего `/`).
pub fn parse(name: &str) -> Vec<&str> {
    name.trim_start_matches('/').split('/').collect()
}

/// Собирает имя канала обратно из сегментов.
pub fn unparse<S: AsRef<str>>(segments: &[S]) -> String {
    let mut name = String::new();
    for segment in segments {
        name.push('/');
        name.push_str(segment.as_ref());
    }
    name
}

/// Канал из зарезервированного пространства `/meta/`.
pub fn is_meta(name: &str) -> bool {
    first_segment(name) == Some(META)
}

/// Канал из пространства `/service/` (запрос-ответ, не рассылается).
pub fn is_service(name: &str) -> bool {
    first_segment(name) == Some(SERVICE)
}

/// Имя метода мета-канала: `"/meta/connect"` → `"connect"`.
pub fn parse_meta_method(name: &str) -> Option<&str> {
    if !is_meta(name) {
        return None;
    }
    parse(name).get(1).copied().filter(|s| !s.is_empty())
}

/// Имя канала или шаблон, удовлетворяющий грамматике.
pub fn is_valid(name: &str) -> bool {
    is_name(name) || is_pattern(name)
}

/// Шаблон вида `/foo/*` или `/foo/**`.
pub fn is_pattern(name: &str) -> bool {
    match name.rsplit_once('/') {
        Some((prefix, "*" | "**")) => prefix.is_empty() || is_name(prefix),
        _ => false,
    }
}

/// Канал, на который может подписаться удалённый клиент.
pub fn is_subscribable(name: &str) -> bool {
    is_valid(name) && !is_meta(name) && !is_service(name)
}

/// Возвращает сам канал и все шаблоны, которые ему соответствуют.
///
/// `/foo/bar` → `["/**", "/foo/bar", "/foo/*", "/foo/**"]`.
pub fn expand(name: &str) -> Vec<String> {
    let segments = parse(name);
    let mut channels = vec!["/**".to_string(), name.to_string()];

    let mut copy = segments.clone();
    if let Some(last) = copy.last_mut() {
        *last = "*";
    }
    channels.push(unparse(&copy));

    for i in 1..segments.len() {
        let mut prefix = segments[..i].to_vec();
        prefix.push("**");
        channels.push(unparse(&prefix));
    }

    channels
}

fn first_segment(name: &str) -> Option<&str> {
    name.strip_prefix('/')?.split('/').next()
}

fn is_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || MARKS.contains(&c))
}

fn is_name(name: &str) -> bool {
    match name.strip_prefix('/') {
        Some(rest) => rest.split('/').all(is_segment),
        None => false,
    }
}
