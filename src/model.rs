use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::db::{ContractDatabase, NullnessDatabase};
use crate::ir::{Class, MethodId};
use crate::vna::ValueNumbering;

/// The analyzed program as produced by the front end: classes with their
/// control-flow graphs, per-method value-numbering facts, and the
/// annotation-derived databases.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct AnalysisModel {
    pub(crate) classes: Vec<Class>,
    #[serde(default)]
    pub(crate) value_numbering: BTreeMap<MethodId, ValueNumbering>,
    #[serde(default)]
    pub(crate) nullness: NullnessDatabase,
    #[serde(default)]
    pub(crate) contracts: ContractDatabase,
}

impl AnalysisModel {
    pub(crate) fn method_count(&self) -> usize {
        self.classes.iter().map(|class| class.methods.len()).sum()
    }
}

/// Loads a method model from JSON, reporting the path into the document on
/// deserialization failures.
pub(crate) fn load_model(path: &Path) -> Result<AnalysisModel> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    let model: AnalysisModel = serde_path_to_error::deserialize(&mut deserializer)
        .with_context(|| format!("failed to parse method model {}", path.display()))?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_model_parses() {
        let raw = r#"{
            "classes": [
                {
                    "name": "com/example/ClassA",
                    "source_file": "ClassA.java",
                    "methods": []
                }
            ],
            "nullness": {
                "methods": {
                    "com/example/ClassA.find()Ljava/lang/Object;": {
                        "return_nullness": "Nullable"
                    }
                }
            }
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();

        let model = load_model(file.path()).unwrap();

        assert_eq!(model.classes.len(), 1);
        assert_eq!(model.method_count(), 0);
        assert_eq!(model.nullness.methods.len(), 1);
        assert!(model.contracts.is_empty());
    }

    #[test]
    fn parse_errors_name_the_offending_path() {
        let raw = r#"{"classes": [{"name": "A", "methods": 3}]}"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();

        let error = load_model(file.path()).unwrap_err();
        let chain = format!("{error:#}");
        assert!(chain.contains("classes"), "unexpected error: {chain}");
    }
}
