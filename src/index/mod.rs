pub mod indexer;
pub mod tokenizer;

pub use indexer::Indexer;

/// Index field a term was found in; each field carries its own boost
/// at ranking time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Title,
    Body,
    Meta,
    Keywords,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Title => "title",
            FieldType::Body => "body",
            FieldType::Meta => "meta",
            FieldType::Keywords => "keywords",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "title" => Some(FieldType::Title),
            "body" => Some(FieldType::Body),
            "meta" => Some(FieldType::Meta),
            "keywords" => Some(FieldType::Keywords),
            _ => None,
        }
    }

    /// Relevance boost applied to raw term frequency in this field
    pub fn boost(&self) -> f64 {
        match self {
            FieldType::Title => 3.0,
            FieldType::Meta => 2.0,
            FieldType::Keywords => 1.5,
            FieldType::Body => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_round_trip() {
        for field in [
            FieldType::Title,
            FieldType::Body,
            FieldType::Meta,
            FieldType::Keywords,
        ] {
            assert_eq!(FieldType::parse(field.as_str()), Some(field));
        }
        assert_eq!(FieldType::parse("headers"), None);
    }
}
