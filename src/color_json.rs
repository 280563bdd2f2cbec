//! Purpose: Pretty-print JSON for terminals, optionally with ANSI colors.
//! Invariants: Without color the output is byte-identical to `serde_json::to_string_pretty`.
use serde_json::{Map, Value};

#[derive(Copy, Clone)]
enum Style {
    Key,
    Text,
    Number,
    Literal,
}

impl Style {
    fn code(self) -> &'static str {
        match self {
            Style::Key => "34",
            Style::Text => "32",
            Style::Number => "33",
            Style::Literal => "35",
        }
    }
}

struct Painter {
    out: String,
    color: bool,
}

impl Painter {
    fn paint(&mut self, style: Style, text: &str) {
        if self.color {
            self.out.push_str("\u{1b}[");
            self.out.push_str(style.code());
            self.out.push('m');
            self.out.push_str(text);
            self.out.push_str("\u{1b}[0m");
        } else {
            self.out.push_str(text);
        }
    }

    fn newline(&mut self, depth: usize) {
        self.out.push('\n');
        self.out.push_str(&"  ".repeat(depth));
    }

    fn value(&mut self, value: &Value, depth: usize) {
        match value {
            Value::Null => self.paint(Style::Literal, "null"),
            Value::Bool(flag) => self.paint(Style::Literal, if *flag { "true" } else { "false" }),
            Value::Number(number) => self.paint(Style::Number, &number.to_string()),
            Value::String(text) => self.paint(Style::Text, &quoted(text)),
            Value::Array(items) if items.is_empty() => self.out.push_str("[]"),
            Value::Array(items) => {
                self.out.push('[');
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        self.out.push(',');
                    }
                    self.newline(depth + 1);
                    self.value(item, depth + 1);
                }
                self.newline(depth);
                self.out.push(']');
            }
            Value::Object(map) => self.object(map, depth),
        }
    }

    fn object(&mut self, map: &Map<String, Value>, depth: usize) {
        if map.is_empty() {
            self.out.push_str("{}");
            return;
        }
        self.out.push('{');
        for (index, (key, value)) in map.iter().enumerate() {
            if index > 0 {
                self.out.push(',');
            }
            self.newline(depth + 1);
            self.paint(Style::Key, &quoted(key));
            self.out.push_str(": ");
            self.value(value, depth + 1);
        }
        self.newline(depth);
        self.out.push('}');
    }
}

fn quoted(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

pub fn colorize_json(value: &Value, use_color: bool) -> String {
    let mut painter = Painter {
        out: String::new(),
        color: use_color,
    };
    painter.value(value, 0);
    painter.out
}
