// Instance labeling

use serde_json::Value;

use crate::models::{FieldData, Process, Submission};

/// Compute the label for a new instance.
///
/// A non-blank label on the submission wins. Otherwise the process' label
/// template is rendered against `data`, and without a template the process
/// definition label is used.
pub fn instance_label(process: &Process, data: &FieldData, submission: Option<&Submission>) -> String {
    if let Some(label) = submission.and_then(Submission::label_override) {
        return label.to_string();
    }

    match process.instance_label_template.as_deref() {
        Some(template) if !template.trim().is_empty() => render(template, data),
        _ => process.process_definition_label.clone(),
    }
}

/// Replace every `{{field}}` with the field's values joined by `", "`
fn render(template: &str, data: &FieldData) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let field = after[..end].trim();
                if let Some(values) = data.get(field) {
                    let rendered: Vec<String> = values.iter().map(display_value).collect();
                    out.push_str(&rendered.join(", "));
                }
                rest = &after[end + 2..];
            }
            None => {
                // unterminated placeholder is literal text
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
