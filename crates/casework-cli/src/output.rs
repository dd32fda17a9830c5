//! Result rendering.

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    pub fn render<T: Serialize + ?Sized>(self, value: &T) -> Result<String> {
        Ok(match self {
            Format::Json => serde_json::to_string_pretty(value)?,
            Format::Yaml => serde_yaml::to_string(value)?,
        })
    }

    pub fn print<T: Serialize + ?Sized>(self, value: &T) -> Result<()> {
        println!("{}", self.render(value)?.trim_end());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_formats() {
        let value = json!({"totalExamples": 1, "averageQuality": 8.0});

        let rendered = Format::Json.render(&value).unwrap();
        assert!(rendered.contains("\"totalExamples\": 1"));

        let rendered = Format::Yaml.render(&value).unwrap();
        assert!(rendered.contains("averageQuality: 8.0"));
    }
}
