use std::fmt::Write;

use crate::{Heap, Value, ValueKind};

const DEFAULT_MAX_DEPTH: usize = 16;

impl Heap {
    /// Human readable form, `{1,2.5,{3}}`. Sequences of printable characters
    /// render as quoted strings.
    pub fn render(&self, value: Value) -> String {
        self.render_with_depth(value, DEFAULT_MAX_DEPTH)
    }

    pub fn render_with_depth(&self, value: Value, max_depth: usize) -> String {
        let mut output = String::new();
        self.render_into(&mut output, value, 0, max_depth);
        output
    }

    fn render_into(
        &self,
        output: &mut String,
        value: Value,
        depth: usize,
        max_depth: usize,
    ) {
        match value.kind() {
            ValueKind::SmallInt(i) => {
                let _ = write!(output, "{i}");
            }
            ValueKind::Double(ptr) => {
                // SAFETY: a double reference points at a live block
                let d = unsafe { ptr.as_ref().value };
                let _ = write!(output, "{d:?}");
            }
            ValueKind::Sentinel => output.push_str("<novalue>"),
            ValueKind::Sequence(ptr) => {
                let elements = self.block(ptr).elements();
                if let Some(text) = as_text(elements) {
                    let _ = write!(output, "{text:?}");
                    return;
                }
                if depth >= max_depth {
                    output.push_str("{...}");
                    return;
                }
                output.push('{');
                for (i, &element) in elements.iter().enumerate() {
                    if i > 0 {
                        output.push(',');
                    }
                    self.render_into(output, element, depth + 1, max_depth);
                }
                output.push('}');
            }
        }
    }
}

fn as_text(elements: &[Value]) -> Option<String> {
    if elements.is_empty() {
        return None;
    }
    elements
        .iter()
        .map(|v| {
            v.as_small_int()
                .filter(|c| (0x20..0x7f).contains(c))
                .map(|c| c as u8 as char)
        })
        .collect()
}
