use std::collections::HashMap;

/// Looks up user-facing text for a translation key
pub trait Translator: Send + Sync {
    fn translate(&self, key: &str, language: &str) -> Option<String>;
}

/// In-memory translation table keyed by language, then by translation key.
/// Lookups fall back to the default language.
#[derive(Debug, Clone, Default)]
pub struct MapTranslator {
    translations: HashMap<String, HashMap<String, String>>,
    default_language: String,
}

impl MapTranslator {
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            translations: HashMap::new(),
            default_language: default_language.into(),
        }
    }

    pub fn with(mut self, language: &str, key: &str, text: &str) -> Self {
        self.translations
            .entry(language.to_string())
            .or_default()
            .insert(key.to_string(), text.to_string());
        self
    }
}

impl Translator for MapTranslator {
    fn translate(&self, key: &str, language: &str) -> Option<String> {
        self.translations
            .get(language)
            .and_then(|table| table.get(key))
            .or_else(|| {
                self.translations
                    .get(&self.default_language)
                    .and_then(|table| table.get(key))
            })
            .cloned()
    }
}
