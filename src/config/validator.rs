use crate::config::Config;
use crate::error::{RecollectError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_storage(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RecollectError::ConfigValidation { errors })
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.chunking.target_size == 0 {
            errors.push(ValidationError::new(
                "chunking.target_size",
                "Target size must be greater than 0",
            ));
        }

        if config.chunking.overlap >= config.chunking.target_size {
            errors.push(ValidationError::new(
                "chunking.overlap",
                "Overlap must be smaller than target size",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.provider.is_empty() {
            errors.push(ValidationError::new(
                "embedding.provider",
                "Provider name cannot be empty",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.cache_max_bytes == 0 {
            errors.push(ValidationError::new(
                "embedding.cache_max_bytes",
                "Cache budget must be greater than 0",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.llm.enabled {
            if config.llm.provider.is_empty() {
                errors.push(ValidationError::new(
                    "llm.provider",
                    "Provider name cannot be empty when LLM is enabled",
                ));
            }

            if config.llm.model.is_empty() {
                errors.push(ValidationError::new(
                    "llm.model",
                    "Model name cannot be empty when LLM is enabled",
                ));
            }
        }

        if !(0.0..=2.0).contains(&config.llm.temperature) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature out of range: {}", config.llm.temperature),
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.max_concurrent_notes == 0 {
            errors.push(ValidationError::new(
                "indexing.max_concurrent_notes",
                "Concurrency limit must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M parameter must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let r = &config.retrieval;

        if r.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        if r.search_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.search_multiplier",
                "search_multiplier must be greater than 0",
            ));
        }

        if r.rrf_k <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                "RRF k constant must be positive",
            ));
        }

        if r.semantic_weight <= 0.0 || r.lexical_weight <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.semantic_weight",
                "Channel weights must be positive",
            ));
        }

        if r.enable_multi_query && r.multi_query_count == 0 {
            errors.push(ValidationError::new(
                "retrieval.multi_query_count",
                "Multi-query count must be greater than 0 when enabled",
            ));
        }

        if r.query_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.query_timeout_ms",
                "Query timeout must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default() {
        assert!(ConfigValidator::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_invalid_chunking_overlap() {
        let mut config = Config::default();
        config.chunking.overlap = config.chunking.target_size;

        let result = ConfigValidator::validate(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_errors_accumulate() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        config.retrieval.rrf_k = 0.0;
        config.embedding.model = String::new();

        match ConfigValidator::validate(&config) {
            Err(RecollectError::ConfigValidation { errors }) => {
                assert!(errors.len() >= 3);
            }
            other => panic!("Expected validation failure, got {:?}", other.is_ok()),
        }
    }
}
