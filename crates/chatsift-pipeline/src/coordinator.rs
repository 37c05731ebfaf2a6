//! Combines tag-rule extraction with the optional auxiliary extractor.

use std::sync::Arc;

use chatsift_ai::AuxiliaryExtractor;
use chatsift_core::{ExtractedFields, SourceConfig, merge, preview, tags};
use tracing::{debug, warn};

/// Fields produced for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Tag-rule output alone.
    pub tag_fields: ExtractedFields,
    /// Tag output merged with auxiliary output; tag values win.
    pub fields: ExtractedFields,
}

pub struct Coordinator {
    auxiliary: Option<Arc<dyn AuxiliaryExtractor>>,
}

impl Coordinator {
    pub fn new(auxiliary: Option<Arc<dyn AuxiliaryExtractor>>) -> Self {
        Self { auxiliary }
    }

    /// Run the tag extractor, then the auxiliary extractor when the source
    /// enables it, and merge.
    ///
    /// Auxiliary failures are logged and leave tag-only output.
    pub fn extract(&self, config: &SourceConfig, raw_text: &str) -> Extraction {
        let tag_fields = tags::extract(raw_text, &config.active_tag_rules());

        let auxiliary = match (&self.auxiliary, config.use_auxiliary) {
            (Some(extractor), true) => match extractor.extract(raw_text) {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(
                        source_id = config.source_id,
                        extractor = extractor.name(),
                        error = %e,
                        text = %preview(raw_text, 100),
                        "auxiliary extraction failed, using tag fields only"
                    );
                    ExtractedFields::new()
                }
            },
            _ => ExtractedFields::new(),
        };

        let fields = merge(tag_fields.clone(), &auxiliary);
        debug!(
            source_id = config.source_id,
            tag_fields = tag_fields.len(),
            fields = fields.len(),
            "extracted"
        );
        Extraction { tag_fields, fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsift_ai::AuxiliaryError;

    struct Fixed(Vec<(&'static str, &'static str)>);

    impl AuxiliaryExtractor for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn extract(&self, _raw_text: &str) -> Result<ExtractedFields, AuxiliaryError> {
            Ok(self.0.iter().copied().collect())
        }
    }

    struct Down;

    impl AuxiliaryExtractor for Down {
        fn name(&self) -> &str {
            "down"
        }
        fn extract(&self, _raw_text: &str) -> Result<ExtractedFields, AuxiliaryError> {
            Err(AuxiliaryError::Unavailable("endpoint unreachable".into()))
        }
    }

    const TEXT: &str = "Дата: 2024-05-16\nАдрес: ул. Ленина 10";

    #[test]
    fn tag_values_win_over_auxiliary() {
        let coordinator = Coordinator::new(Some(Arc::new(Fixed(vec![
            ("date", "1999-01-01"),
            ("phone", "79991234567"),
        ]))));
        let out = coordinator.extract(&SourceConfig::with_defaults(1), TEXT);
        assert_eq!(out.fields.get("date"), Some("2024-05-16"));
        assert_eq!(out.fields.get("phone"), Some("79991234567"));
        assert!(!out.tag_fields.contains("phone"));
    }

    #[test]
    fn auxiliary_skipped_when_disabled() {
        let coordinator = Coordinator::new(Some(Arc::new(Fixed(vec![("phone", "1")]))));
        let mut config = SourceConfig::with_defaults(1);
        config.use_auxiliary = false;
        let out = coordinator.extract(&config, TEXT);
        assert_eq!(out.fields, out.tag_fields);
        assert_eq!(out.fields.len(), 2);
    }

    #[test]
    fn auxiliary_failure_degrades_to_tag_fields() {
        let coordinator = Coordinator::new(Some(Arc::new(Down)));
        let out = coordinator.extract(&SourceConfig::with_defaults(1), TEXT);
        assert_eq!(out.fields.get("address"), Some("ул. Ленина 10"));
        assert_eq!(out.fields, out.tag_fields);
    }

    #[test]
    fn no_extractor_configured() {
        let out = Coordinator::new(None).extract(&SourceConfig::with_defaults(1), "просто текст");
        assert!(out.fields.is_empty());
    }
}
