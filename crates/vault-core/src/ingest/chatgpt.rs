//! ChatGPT `conversations.json` adapter.
//!
//! The export is an array of conversations. Each conversation stores its
//! messages as a tree in `mapping` (node id -> node with parent/children),
//! because editing a prompt or regenerating a reply forks the thread. We
//! linearise the branch the user last looked at: walk up from
//! `current_node` when present, otherwise walk down from the root taking
//! the last (newest) child at every fork.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};
use crate::storage::Actor;

use super::{dedup_messages, parse_timestamp, ParsedConversation, ParsedMessage, ProviderAdapter};

/// Exports larger than this are rejected outright.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Files up to this size are fully parsed by `validate_format`; larger ones
/// are only sniffed.
const SNIFF_LEN: usize = 64 * 1024;

const PROVIDER: &str = "chatgpt";
const UNTITLED: &str = "Untitled";

#[derive(Debug, Deserialize)]
struct RawConversation {
    title: Option<String>,
    create_time: Option<Value>,
    update_time: Option<Value>,
    id: Option<String>,
    conversation_id: Option<String>,
    current_node: Option<String>,
    mapping: HashMap<String, RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    message: Option<RawMessage>,
    parent: Option<String>,
    children: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: Option<String>,
    author: Option<RawAuthor>,
    content: Option<RawContent>,
    create_time: Option<Value>,
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawContent {
    content_type: Option<String>,
    parts: Option<Vec<Value>>,
    text: Option<String>,
}

/// Message tree flattened into an arena; links are indices into `nodes`.
struct Tree {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

struct Node {
    message: Option<RawMessage>,
    /// Raw parent id; may name a node missing from the mapping
    parent_id: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl Tree {
    fn build(mapping: HashMap<String, RawNode>) -> Self {
        let mut entries: Vec<(String, RawNode)> = mapping.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let index: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (id.clone(), i))
            .collect();

        let nodes = entries
            .into_iter()
            .map(|(_, raw)| {
                let parent = raw.parent.as_ref().and_then(|p| index.get(p).copied());
                let children = raw
                    .children
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|c| index.get(c).copied())
                    .collect();
                Node {
                    message: raw.message,
                    parent_id: raw.parent,
                    parent,
                    children,
                }
            })
            .collect();

        Self { nodes, index }
    }

    /// Root node: the first id (sorted) with a null parent, else the first
    /// whose parent is absent from the mapping.
    fn root(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.parent_id.is_none())
            .or_else(|| self.nodes.iter().position(|n| n.parent.is_none()))
    }

    /// Node indices of the active branch, root first.
    fn active_chain(&self, current_node: Option<&str>) -> Vec<usize> {
        let mut visited = HashSet::new();
        let mut chain = Vec::new();

        if let Some(&leaf) = current_node.and_then(|id| self.index.get(id)) {
            let mut cursor = Some(leaf);
            while let Some(i) = cursor {
                if !visited.insert(i) {
                    break;
                }
                chain.push(i);
                cursor = self.nodes[i].parent;
            }
            chain.reverse();
            return chain;
        }

        let mut cursor = self.root();
        while let Some(i) = cursor {
            if !visited.insert(i) {
                break;
            }
            chain.push(i);
            cursor = self.nodes[i].children.last().copied();
        }
        chain
    }
}

/// Adapter for ChatGPT data exports.
#[derive(Debug, Clone)]
pub struct ChatGptAdapter {
    max_file_size: u64,
}

impl Default for ChatGptAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatGptAdapter {
    pub fn new() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
        }
    }

    /// Adapter with a custom size ceiling.
    pub fn with_max_file_size(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    fn read_export(&self, path: &Path) -> Result<Vec<Value>> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::NotFound(format!(
                    "Export file not found: {}",
                    path.display()
                )));
            }
            Err(err) => return Err(err.into()),
        };
        if meta.len() > self.max_file_size {
            return Err(VaultError::Format(format!(
                "{} is too large ({} bytes, limit {} bytes)",
                path.display(),
                meta.len(),
                self.max_file_size
            )));
        }

        let bytes = std::fs::read(path)?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            VaultError::Format(format!("Invalid JSON in {}: {}", path.display(), e))
        })?;
        match value {
            Value::Array(items) => Ok(items),
            _ => Err(VaultError::Format(format!(
                "{} does not contain a top-level JSON array",
                path.display()
            ))),
        }
    }

    fn parse_conversation(&self, raw: RawConversation) -> Option<ParsedConversation> {
        let created_at =
            parse_timestamp(raw.create_time.as_ref()).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let updated_at = parse_timestamp(raw.update_time.as_ref()).unwrap_or(created_at);
        let title = raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());
        let external_id = raw
            .id
            .filter(|id| !id.is_empty())
            .or(raw.conversation_id.filter(|id| !id.is_empty()));

        let mut tree = Tree::build(raw.mapping);
        let chain = tree.active_chain(raw.current_node.as_deref());

        let mut messages = Vec::new();
        let mut models: Vec<String> = Vec::new();
        for i in chain {
            let Some(message) = tree.nodes[i].message.take() else {
                continue;
            };
            if let Some(parsed) = parse_message(message, created_at) {
                if let Some(slug) = parsed.metadata.get("model_slug").and_then(Value::as_str) {
                    if !models.iter().any(|m| m == slug) {
                        models.push(slug.to_string());
                    }
                }
                messages.push(parsed);
            }
        }
        let messages = dedup_messages(messages);

        if messages.is_empty() {
            debug!(title = %title, "skipping conversation without usable messages");
            return None;
        }

        let metadata = if models.is_empty() {
            json!({})
        } else {
            json!({ "models": models })
        };

        Some(ParsedConversation {
            source: PROVIDER.to_string(),
            external_id,
            title,
            created_at,
            updated_at,
            messages,
            metadata,
        })
    }
}

impl ProviderAdapter for ChatGptAdapter {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn validate_format(&self, path: &Path) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        if !meta.is_file() || meta.len() > self.max_file_size {
            return false;
        }
        if meta.len() <= SNIFF_LEN as u64 {
            return self
                .read_export(path)
                .is_ok_and(|items| items.first().is_some_and(has_mapping));
        }
        // Large exports: only look at the head of the file.
        let Ok(file) = std::fs::File::open(path) else {
            return false;
        };
        let mut head = Vec::with_capacity(SNIFF_LEN);
        if file.take(SNIFF_LEN as u64).read_to_end(&mut head).is_err() {
            return false;
        }
        let head = String::from_utf8_lossy(&head);
        let Some(rest) = head.trim_start().strip_prefix('[') else {
            return false;
        };
        rest.trim_start().starts_with('{') && rest.contains("\"mapping\"")
    }

    fn parse(&self, path: &Path) -> Result<Vec<ParsedConversation>> {
        let items = self.read_export(path)?;

        let mut conversations = Vec::new();
        let mut malformed = 0usize;
        for (idx, item) in items.into_iter().enumerate() {
            if !has_mapping(&item) {
                warn!(index = idx, "skipping element without a 'mapping' object");
                malformed += 1;
                continue;
            }
            let raw: RawConversation = match serde_json::from_value(item) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(index = idx, "skipping malformed conversation: {}", err);
                    malformed += 1;
                    continue;
                }
            };
            if let Some(conversation) = self.parse_conversation(raw) {
                conversations.push(conversation);
            }
        }
        if malformed > 0 {
            warn!(malformed, file = %path.display(), "some export elements were skipped");
        }

        info!(
            conversations = conversations.len(),
            file = %path.display(),
            "parsed chatgpt export"
        );
        Ok(conversations)
    }
}

fn has_mapping(item: &Value) -> bool {
    item.get("mapping").is_some_and(Value::is_object)
}

fn parse_message(raw: RawMessage, fallback: DateTime<Utc>) -> Option<ParsedMessage> {
    let role = raw.author.and_then(|a| a.role)?;
    let actor = match role.as_str() {
        "user" => Actor::User,
        "assistant" => Actor::Assistant,
        "tool" => Actor::Tool,
        "system" => return None,
        other => {
            debug!(role = other, "skipping message with unknown role");
            return None;
        }
    };

    let content = extract_text(raw.content.as_ref()?);
    if content.is_empty() {
        return None;
    }

    let mut metadata = serde_json::Map::new();
    if let Some(meta) = raw.metadata.as_ref() {
        if let Some(slug) = meta.get("model_slug").and_then(Value::as_str) {
            if !slug.is_empty() {
                metadata.insert("model_slug".to_string(), json!(slug));
            }
        }
        if meta
            .get("is_visually_hidden_from_conversation")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            metadata.insert("hidden".to_string(), json!(true));
        }
    }

    Some(ParsedMessage {
        external_id: raw.id.unwrap_or_default(),
        actor,
        content,
        timestamp: parse_timestamp(raw.create_time.as_ref()).unwrap_or(fallback),
        metadata: Value::Object(metadata),
    })
}

/// Plain text of a message, trimmed. Empty for unsupported content types.
fn extract_text(content: &RawContent) -> String {
    let parts = content.parts.as_deref().unwrap_or_default();
    let text = match content.content_type.as_deref() {
        Some("text") | Some("multimodal_text") => join_string_parts(parts),
        Some("code") => {
            let joined = join_string_parts(parts);
            if joined.trim().is_empty() {
                content.text.clone().unwrap_or_default()
            } else {
                joined
            }
        }
        _ => String::new(),
    };
    text.trim().to_string()
}

fn join_string_parts(parts: &[Value]) -> String {
    parts.iter().filter_map(Value::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_export(value: &Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file
    }

    fn node(id: &str, role: Option<&str>, text: &str, parent: Option<&str>, children: &[&str]) -> Value {
        let message = role.map(|role| {
            json!({
                "id": id,
                "author": { "role": role },
                "content": { "content_type": "text", "parts": [text] },
                "create_time": 1_700_000_100.0,
                "metadata": { "model_slug": "gpt-4" }
            })
        });
        json!({ "id": id, "message": message, "parent": parent, "children": children })
    }

    fn hello_export() -> Value {
        json!([{
            "title": "Greeting",
            "create_time": 1_700_000_000.0,
            "update_time": 1_700_000_500.0,
            "id": "conv-1",
            "mapping": {
                "root": node("root", None, "", None, &["sys"]),
                "sys": node("sys", Some("system"), "You are helpful", Some("root"), &["u1"]),
                "u1": node("u1", Some("user"), "Hello", Some("sys"), &["a1"]),
                "a1": node("a1", Some("assistant"), "Hi!", Some("u1"), &[])
            }
        }])
    }

    #[test]
    fn test_parse_simple_conversation() {
        let file = write_export(&hello_export());
        let conversations = ChatGptAdapter::new().parse(file.path()).unwrap();

        assert_eq!(conversations.len(), 1);
        let conv = &conversations[0];
        assert_eq!(conv.title, "Greeting");
        assert_eq!(conv.source, "chatgpt");
        assert_eq!(conv.external_id.as_deref(), Some("conv-1"));
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].actor, Actor::User);
        assert_eq!(conv.messages[0].content, "Hello");
        assert_eq!(conv.messages[1].actor, Actor::Assistant);
        assert_eq!(conv.messages[1].content, "Hi!");
        assert_eq!(conv.metadata["models"], json!(["gpt-4"]));
        assert_eq!(conv.updated_at.timestamp(), 1_700_000_500);
    }

    #[test]
    fn test_last_child_branch_is_followed() {
        let export = json!([{
            "title": "Branching",
            "create_time": 1_700_000_000.0,
            "mapping": {
                "root": node("root", None, "", None, &["u1"]),
                "u1": node("u1", Some("user"), "Question", Some("root"), &["old", "new"]),
                "old": node("old", Some("assistant"), "First draft", Some("u1"), &[]),
                "new": node("new", Some("assistant"), "Regenerated", Some("u1"), &[])
            }
        }]);
        let file = write_export(&export);
        let conv = &ChatGptAdapter::new().parse(file.path()).unwrap()[0];
        let texts: Vec<&str> = conv.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["Question", "Regenerated"]);
    }

    #[test]
    fn test_current_node_selects_branch() {
        let export = json!([{
            "title": "Branching",
            "create_time": 1_700_000_000.0,
            "current_node": "old",
            "mapping": {
                "root": node("root", None, "", None, &["u1"]),
                "u1": node("u1", Some("user"), "Question", Some("root"), &["old", "new"]),
                "old": node("old", Some("assistant"), "First draft", Some("u1"), &[]),
                "new": node("new", Some("assistant"), "Regenerated", Some("u1"), &[])
            }
        }]);
        let file = write_export(&export);
        let conv = &ChatGptAdapter::new().parse(file.path()).unwrap()[0];
        assert_eq!(conv.messages[1].content, "First draft");
    }

    #[test]
    fn test_cycle_does_not_loop_forever() {
        let export = json!([{
            "title": "Cycle",
            "create_time": 1_700_000_000.0,
            "mapping": {
                "a": node("a", Some("user"), "one", None, &["b"]),
                "b": node("b", Some("assistant"), "two", Some("a"), &["a"])
            }
        }]);
        let file = write_export(&export);
        let conv = &ChatGptAdapter::new().parse(file.path()).unwrap()[0];
        assert_eq!(conv.messages.len(), 2);
    }

    #[test]
    fn test_empty_and_unsupported_content_skipped() {
        let export = json!([{
            "title": "Mixed",
            "create_time": 1_700_000_000.0,
            "mapping": {
                "u1": node("u1", Some("user"), "   ", None, &["img"]),
                "img": {
                    "id": "img",
                    "message": {
                        "author": { "role": "user" },
                        "content": {
                            "content_type": "multimodal_text",
                            "parts": [{ "asset_pointer": "file://x" }, "caption"]
                        }
                    },
                    "parent": "u1",
                    "children": ["browse"]
                },
                "browse": {
                    "id": "browse",
                    "message": {
                        "author": { "role": "tool" },
                        "content": { "content_type": "tether_browsing_display", "result": "..." }
                    },
                    "parent": "img",
                    "children": ["code"]
                },
                "code": {
                    "id": "code",
                    "message": {
                        "author": { "role": "assistant" },
                        "content": { "content_type": "code", "text": "print(1)" }
                    },
                    "parent": "browse",
                    "children": []
                }
            }
        }]);
        let file = write_export(&export);
        let conv = &ChatGptAdapter::new().parse(file.path()).unwrap()[0];
        let texts: Vec<&str> = conv.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["caption", "print(1)"]);
        // Message timestamps fall back to the conversation's
        assert_eq!(conv.messages[0].timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_tool_messages_kept() {
        let export = json!([{
            "title": "Tools",
            "create_time": 1_700_000_000.0,
            "mapping": {
                "u1": node("u1", Some("user"), "search", None, &["t1"]),
                "t1": node("t1", Some("tool"), "results", Some("u1"), &[])
            }
        }]);
        let file = write_export(&export);
        let conv = &ChatGptAdapter::new().parse(file.path()).unwrap()[0];
        assert_eq!(conv.messages[1].actor, Actor::Tool);
    }

    #[test]
    fn test_conversation_without_messages_skipped() {
        let export = json!([
            {
                "title": "Only system",
                "create_time": 1_700_000_000.0,
                "mapping": { "s": node("s", Some("system"), "sys", None, &[]) }
            },
            hello_export()[0].clone()
        ]);
        let file = write_export(&export);
        let conversations = ChatGptAdapter::new().parse(file.path()).unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].title, "Greeting");
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let export = json!([{
            "conversation_id": "fallback-id",
            "mapping": { "u": node("u", Some("user"), "hey", None, &[]) }
        }]);
        let file = write_export(&export);
        let conv = &ChatGptAdapter::new().parse(file.path()).unwrap()[0];
        assert_eq!(conv.title, "Untitled");
        assert_eq!(conv.created_at, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(conv.external_id.as_deref(), Some("fallback-id"));
    }

    #[test]
    fn test_parse_errors() {
        let adapter = ChatGptAdapter::new();
        assert!(matches!(
            adapter.parse(Path::new("/definitely/not/here.json")),
            Err(VaultError::NotFound(_))
        ));

        let not_array = write_export(&json!({ "mapping": {} }));
        assert!(matches!(
            adapter.parse(not_array.path()),
            Err(VaultError::Format(_))
        ));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        garbage.write_all(b"[{not json").unwrap();
        assert!(matches!(
            adapter.parse(garbage.path()),
            Err(VaultError::Format(_))
        ));
    }

    #[test]
    fn test_size_ceiling() {
        let file = write_export(&hello_export());
        let adapter = ChatGptAdapter::with_max_file_size(10);
        assert!(matches!(adapter.parse(file.path()), Err(VaultError::Format(_))));
        assert!(!adapter.validate_format(file.path()));
    }

    #[test]
    fn test_validate_format() {
        let adapter = ChatGptAdapter::new();
        assert!(adapter.validate_format(write_export(&hello_export()).path()));
        assert!(!adapter.validate_format(write_export(&json!([])).path()));
        assert!(!adapter.validate_format(write_export(&json!([{ "mapping": [] }])).path()));
        assert!(!adapter.validate_format(Path::new("/definitely/not/here.json")));
        assert!(!adapter.validate_format(write_export(&json!({ "mapping": {} })).path()));
    }

    #[test]
    fn test_validate_format_sniffs_large_exports() {
        let adapter = ChatGptAdapter::new();
        let mut export = hello_export();
        let padding = "x".repeat(SNIFF_LEN);
        export[0]["padding"] = json!(padding);
        let file = write_export(&export);
        assert!(adapter.validate_format(file.path()));

        let mut not_export = tempfile::NamedTempFile::new().unwrap();
        not_export
            .write_all(format!("{{\"data\": \"{}\"}}", padding).as_bytes())
            .unwrap();
        assert!(!adapter.validate_format(not_export.path()));
    }

    #[test]
    fn test_malformed_elements_are_skipped() {
        let mut export = hello_export();
        let good = export[0].clone();
        let mut second = good.clone();
        second["title"] = json!("Second");
        let items = export.as_array_mut().unwrap();
        items.push(json!({ "title": 42, "mapping": {} }));
        items.push(json!({ "title": "no mapping" }));
        items.push(Value::Null);
        items.push(json!({ "title": "null node", "mapping": { "n": null } }));
        items.push(second);

        let file = write_export(&export);
        let conversations = ChatGptAdapter::new().parse(file.path()).unwrap();
        let titles: Vec<&str> = conversations.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Greeting", "Second"]);
    }
}
