use std::io::{stdout, Write};

use anyhow::{Context, Result};
use handlebars::handlebars_helper;
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

fn render_text<T: Serialize>(data: &T, template: &str) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let num = usize::try_from(num).unwrap_or_default().max(v.len());
        format!("{}{v}", " ".repeat(num - v.len()))
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("output", template)
        .context("registering template")?;

    hb.render("output", data).context("rendering text")
}

/// Write `data` to stdout as pretty JSON or using the text `template`.
pub fn write<T: Serialize>(data: &T, format: &Format, template: &str) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), data).context("serializing to json")?;
            stdout().write_all(b"\n").context("writing to stdout")
        }
        Format::Text => {
            let text = render_text(data, template)?;
            stdout()
                .write_all(text.as_bytes())
                .context("writing to stdout")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        name: String,
        count: u64,
    }

    #[test]
    fn test_lpad() {
        let row = Row {
            name: "abc".to_string(),
            count: 12345,
        };

        let text = render_text(&row, "{{ lpad 6 name }}|{{ lpad 2 count }}|").unwrap();

        assert_eq!(text, "   abc|12345|");
    }
}
