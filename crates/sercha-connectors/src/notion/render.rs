//! Pure rendering helpers: Notion block trees and property bags into
//! Markdown/plain strings. Kept free of any I/O so it can be reasoned
//! about (and tested) without a mock HTTP server.

use std::collections::HashMap;

use serde_json::Value;

/// Concatenates the `plain_text` of every rich-text span in an array.
/// Returns `None` for an empty or non-array value so callers can fall
/// back to a default title.
pub fn plain_text_of(rich_text: &Value) -> Option<String> {
    let spans = rich_text.as_array()?;
    if spans.is_empty() {
        return None;
    }
    let text: String = spans
        .iter()
        .filter_map(|s| s["plain_text"].as_str())
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn indent(depth: u32) -> String {
    "  ".repeat(depth as usize)
}

/// Renders a flat array of top-level blocks (each possibly carrying
/// pre-fetched `_children`, stitched in by the caller) into Markdown.
pub fn render_blocks(blocks: &[Value]) -> String {
    let mut out = String::new();
    render_blocks_into(blocks, 0, &mut out);
    out
}

fn render_blocks_into(blocks: &[Value], depth: u32, out: &mut String) {
    for block in blocks {
        render_block_into(block, depth, out);
    }
}

fn render_block_into(block: &Value, depth: u32, out: &mut String) {
    let Some(block_type) = block["type"].as_str() else { return };
    // Duplicated content that lives elsewhere in the workspace; rendering
    // it here would either recurse indefinitely or double up on docs.
    if matches!(block_type, "synced_block" | "column_list" | "column" | "breadcrumb" | "table_of_contents") {
        if let Some(children) = block["_children"].as_array() {
            render_blocks_into(children, depth, out);
        }
        return;
    }

    let body = &block[block_type];
    let pad = indent(depth);

    match block_type {
        "heading_1" => push_line(out, &format!("{pad}# {}", text_of(body))),
        "heading_2" => push_line(out, &format!("{pad}## {}", text_of(body))),
        "heading_3" => push_line(out, &format!("{pad}### {}", text_of(body))),
        "paragraph" => {
            let text = text_of(body);
            if !text.is_empty() {
                push_line(out, &format!("{pad}{text}"));
            }
        }
        "bulleted_list_item" => push_line(out, &format!("{pad}- {}", text_of(body))),
        "numbered_list_item" => push_line(out, &format!("{pad}1. {}", text_of(body))),
        "to_do" => {
            let checked = body["checked"].as_bool().unwrap_or(false);
            let mark = if checked { "x" } else { " " };
            push_line(out, &format!("{pad}- [{mark}] {}", text_of(body)));
        }
        "toggle" => push_line(out, &format!("{pad}<details><summary>{}</summary>", text_of(body))),
        "quote" => push_line(out, &format!("{pad}> {}", text_of(body))),
        "callout" => {
            let icon = body["icon"]["emoji"].as_str().unwrap_or("\u{1f4dd}");
            push_line(out, &format!("{pad}> {icon} {}", text_of(body)));
        }
        "code" => {
            let lang = body["language"].as_str().unwrap_or("");
            push_line(out, &format!("{pad}```{lang}"));
            push_line(out, &format!("{pad}{}", text_of(body)));
            push_line(out, &format!("{pad}```"));
        }
        "divider" => push_line(out, "---"),
        "image" | "video" | "file" | "pdf" => {
            let url = media_url(body);
            let caption = plain_text_of(&body["caption"]).unwrap_or_default();
            push_line(out, &format!("{pad}![{caption}]({url})"));
        }
        "table" => render_table(block, depth, out),
        "table_row" => {} // handled by the owning `table` block
        "child_page" | "child_database" => {
            let title = body["title"].as_str().unwrap_or("Untitled");
            push_line(out, &format!("{pad}- {title} (linked)"));
        }
        _ => {
            let text = text_of(body);
            if !text.is_empty() {
                push_line(out, &format!("{pad}{text}"));
            }
        }
    }

    if block_type == "toggle" {
        if let Some(children) = block["_children"].as_array() {
            render_blocks_into(children, depth + 1, out);
        }
        push_line(out, "</details>");
        return;
    }

    if block_type != "table" {
        if let Some(children) = block["_children"].as_array() {
            render_blocks_into(children, depth + 1, out);
        }
    }
}

fn render_table(block: &Value, depth: u32, out: &mut String) {
    let pad = indent(depth);
    let has_header = block["table"]["has_column_header"].as_bool().unwrap_or(false);
    let Some(rows) = block["_children"].as_array() else { return };
    for (i, row) in rows.iter().enumerate() {
        let cells = row["table_row"]["cells"].as_array().cloned().unwrap_or_default();
        let rendered: Vec<String> = cells.iter().map(|c| plain_text_of(c).unwrap_or_default()).collect();
        push_line(out, &format!("{pad}| {} |", rendered.join(" | ")));
        if i == 0 && has_header {
            let sep = vec!["---"; rendered.len()].join(" | ");
            push_line(out, &format!("{pad}| {sep} |"));
        }
    }
}

fn media_url(body: &Value) -> String {
    body["file"]["url"]
        .as_str()
        .or_else(|| body["external"]["url"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn text_of(body: &Value) -> String {
    plain_text_of(&body["rich_text"]).unwrap_or_default()
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

/// Summarizes a database's property schema as a Markdown bullet list
/// (`name: type`), used as the body of the per-database summary doc.
pub fn render_property_schema(properties: &Value) -> String {
    let Some(map) = properties.as_object() else {
        return String::new();
    };
    let mut lines: Vec<String> = map
        .iter()
        .map(|(name, def)| {
            let ty = def["type"].as_str().unwrap_or("unknown");
            format!("- {name}: {ty}")
        })
        .collect();
    lines.sort();
    lines.join("\n")
}

/// Flattens a row's typed properties into a flat string metadata map,
/// and separately surfaces whatever property has type `title` as the
/// row's display title.
pub fn flatten_properties(properties: &Value) -> (HashMap<String, String>, Option<String>) {
    let mut metadata = HashMap::new();
    let mut title = None;
    let Some(map) = properties.as_object() else {
        return (metadata, title);
    };
    for (name, def) in map {
        let ty = def["type"].as_str().unwrap_or("");
        let rendered = match ty {
            "title" => plain_text_of(&def["title"]),
            "rich_text" => plain_text_of(&def["rich_text"]),
            "number" => def["number"].as_f64().map(|n| n.to_string()),
            "select" => def["select"]["name"].as_str().map(String::from),
            "multi_select" => {
                let values: Vec<String> = def["multi_select"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|v| v["name"].as_str().map(String::from))
                    .collect();
                Some(values.join(", "))
            }
            "checkbox" => def["checkbox"].as_bool().map(|b| b.to_string()),
            "date" => def["date"]["start"].as_str().map(String::from),
            "url" | "email" | "phone_number" => def[ty].as_str().map(String::from),
            "people" => {
                let values: Vec<String> = def["people"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|v| v["name"].as_str().map(String::from))
                    .collect();
                Some(values.join(", "))
            }
            _ => None,
        };
        if ty == "title" {
            title = rendered.clone();
        }
        if let Some(value) = rendered {
            metadata.insert(name.clone(), value);
        }
    }
    (metadata, title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_heading_and_paragraph() {
        let blocks = vec![
            json!({"type": "heading_1", "heading_1": {"rich_text": [{"plain_text": "Title"}]}}),
            json!({"type": "paragraph", "paragraph": {"rich_text": [{"plain_text": "Body text"}]}}),
        ];
        let rendered = render_blocks(&blocks);
        assert!(rendered.contains("# Title"));
        assert!(rendered.contains("Body text"));
    }

    #[test]
    fn renders_todo_checkbox_state() {
        let blocks = vec![json!({
            "type": "to_do",
            "to_do": {"checked": true, "rich_text": [{"plain_text": "Done item"}]}
        })];
        let rendered = render_blocks(&blocks);
        assert!(rendered.contains("- [x] Done item"));
    }

    #[test]
    fn skips_synced_block_wrapper_but_keeps_children() {
        let blocks = vec![json!({
            "type": "synced_block",
            "synced_block": {},
            "_children": [
                {"type": "paragraph", "paragraph": {"rich_text": [{"plain_text": "Synced text"}]}}
            ]
        })];
        let rendered = render_blocks(&blocks);
        assert_eq!(rendered.trim(), "Synced text");
    }

    #[test]
    fn flattens_select_and_checkbox_properties() {
        let properties = json!({
            "Name": {"type": "title", "title": [{"plain_text": "Row One"}]},
            "Status": {"type": "select", "select": {"name": "Done"}},
            "Active": {"type": "checkbox", "checkbox": true}
        });
        let (metadata, title) = flatten_properties(&properties);
        assert_eq!(title.as_deref(), Some("Row One"));
        assert_eq!(metadata.get("Status").map(String::as_str), Some("Done"));
        assert_eq!(metadata.get("Active").map(String::as_str), Some("true"));
    }
}
