pub mod azure_inference;
pub mod azure_openai;
pub mod github_rag;
pub mod gitlab_rag;

use crate::core::plugin::ModelIdentity;

/// Pairs semicolon-separated deployment ids with display names, zipping to the
/// shorter list when the two disagree in length.
pub(crate) fn zip_model_identities(models: &str, names: &str) -> Vec<ModelIdentity> {
    let ids: Vec<&str> = models
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let labels: Vec<&str> = names
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    ids.iter()
        .zip(labels.iter().chain(std::iter::repeat(&"")))
        .map(|(id, name)| ModelIdentity {
            id: (*id).to_string(),
            name: if name.is_empty() {
                (*id).to_string()
            } else {
                (*name).to_string()
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zips_ids_with_names() {
        let models = zip_model_identities("gpt-4o;gpt-4o-mini", "GPT-4o;GPT-4o Mini");
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "gpt-4o");
        assert_eq!(models[1].name, "GPT-4o Mini");
    }

    #[test]
    fn missing_names_fall_back_to_ids() {
        let models = zip_model_identities("gpt-4o;o1-mini", "GPT-4o");
        assert_eq!(models.len(), 2);
        assert_eq!(models[1].name, "o1-mini");
    }

    #[test]
    fn extra_names_are_dropped() {
        let models = zip_model_identities("gpt-4o", "GPT-4o;Leftover");
        assert_eq!(models.len(), 1);
    }
}
