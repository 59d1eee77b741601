//! # Multi-environment source
//!
//! One common layer plus one NaCl file source per environment. The
//! effective view of an environment is the union of common and the env's
//! own files, with the env winning when both define the same file name.

use crate::nacl_file_source::NaclFileSource;
use nacl_merger::Fragment;
use nacl_model::ElemID;
use nacl_parser::ParseError;
use std::collections::{BTreeMap, BTreeSet};

pub const COMMON_PREFIX: &str = "common";
pub const ENVS_PREFIX: &str = "envs";

/// Which layer a workspace-relative file name addresses
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Common,
    Env(String),
}

/// Split a workspace-relative name (`common/a.nacl`, `envs/dev/a.nacl`)
/// into its layer and layer-relative name. Unprefixed names belong to
/// the current environment.
pub fn split_layer(name: &str, current_env: &str) -> (Layer, String) {
    if let Some(rest) = name.strip_prefix("common/") {
        return (Layer::Common, rest.to_string());
    }
    if let Some(rest) = name.strip_prefix("envs/") {
        if let Some((env, file)) = rest.split_once('/') {
            return (Layer::Env(env.to_string()), file.to_string());
        }
    }
    (Layer::Env(current_env.to_string()), name.to_string())
}

/// Join a layer-relative name back into its workspace-relative form
pub fn layer_name(layer: &Layer, name: &str) -> String {
    match layer {
        Layer::Common => format!("{}/{}", COMMON_PREFIX, name),
        Layer::Env(env) => format!("{}/{}/{}", ENVS_PREFIX, env, name),
    }
}

#[derive(Clone, Default)]
pub struct MultiEnvSource {
    pub common: NaclFileSource,
    pub envs: BTreeMap<String, NaclFileSource>,
}

impl MultiEnvSource {
    pub fn new(env_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            common: NaclFileSource::new(),
            envs: env_names
                .into_iter()
                .map(|name| (name, NaclFileSource::new()))
                .collect(),
        }
    }

    pub fn env(&self, name: &str) -> Option<&NaclFileSource> {
        self.envs.get(name)
    }

    pub fn env_mut(&mut self, name: &str) -> Option<&mut NaclFileSource> {
        self.envs.get_mut(name)
    }

    /// Env files shadow common files with the same layer-relative name
    fn shadowed(&self, env_name: &str) -> BTreeSet<String> {
        self.envs
            .get(env_name)
            .map(|env| env.list_nacl_files().into_iter().collect())
            .unwrap_or_default()
    }

    /// All fragments visible from one environment, with filenames
    /// qualified by layer so the merger can tell the layers apart
    pub fn fragments_for(&self, env_name: &str) -> Vec<Fragment> {
        let shadowed = self.shadowed(env_name);
        let mut fragments: Vec<Fragment> = self
            .common
            .fragments()
            .into_iter()
            .filter(|fragment| !shadowed.contains(&fragment.filename))
            .map(|fragment| Fragment {
                filename: layer_name(&Layer::Common, &fragment.filename),
                ..fragment
            })
            .collect();
        if let Some(env) = self.envs.get(env_name) {
            let env_layer = Layer::Env(env_name.to_string());
            fragments.extend(env.fragments().into_iter().map(|fragment| Fragment {
                filename: layer_name(&env_layer, &fragment.filename),
                ..fragment
            }));
        }
        fragments
    }

    /// Fragments of one element, as visible from one environment
    pub fn fragments_of(&self, env_name: &str, id: &ElemID) -> Vec<Fragment> {
        let shadowed = self.shadowed(env_name);
        let mut fragments: Vec<Fragment> = self
            .common
            .fragments_of(id)
            .into_iter()
            .filter(|fragment| !shadowed.contains(&fragment.filename))
            .map(|fragment| Fragment {
                filename: layer_name(&Layer::Common, &fragment.filename),
                ..fragment
            })
            .collect();
        if let Some(env) = self.envs.get(env_name) {
            let env_layer = Layer::Env(env_name.to_string());
            fragments.extend(env.fragments_of(id).into_iter().map(|fragment| Fragment {
                filename: layer_name(&env_layer, &fragment.filename),
                ..fragment
            }));
        }
        fragments
    }

    pub fn parse_errors(&self, env_name: &str) -> Vec<ParseError> {
        let mut errors = self.common.parse_errors();
        if let Some(env) = self.envs.get(env_name) {
            errors.extend(env.parse_errors());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nacl_file_source::NaclFile;

    #[test]
    fn test_split_layer() {
        assert_eq!(
            split_layer("common/a.nacl", "dev"),
            (Layer::Common, "a.nacl".to_string())
        );
        assert_eq!(
            split_layer("envs/prod/sub/a.nacl", "dev"),
            (Layer::Env("prod".to_string()), "sub/a.nacl".to_string())
        );
        assert_eq!(
            split_layer("a.nacl", "dev"),
            (Layer::Env("dev".to_string()), "a.nacl".to_string())
        );
    }

    #[test]
    fn test_env_file_shadows_common() {
        let mut source = MultiEnvSource::new(["dev".to_string()]);
        source.common.set_nacl_files(vec![NaclFile::new(
            "a.nacl",
            "type salesforce.Account { string common_field {} }",
        )]);
        source.env_mut("dev").unwrap().set_nacl_files(vec![NaclFile::new(
            "a.nacl",
            "type salesforce.Account { string env_field {} }",
        )]);

        let fragments = source.fragments_for("dev");
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].filename, "envs/dev/a.nacl");
    }

    #[test]
    fn test_fragments_union_without_collision() {
        let mut source = MultiEnvSource::new(["dev".to_string()]);
        source.common.set_nacl_files(vec![NaclFile::new(
            "shared.nacl",
            "type salesforce.Account { string a {} }",
        )]);
        source.env_mut("dev").unwrap().set_nacl_files(vec![NaclFile::new(
            "local.nacl",
            "type salesforce.Account { string b {} }",
        )]);
        let fragments = source.fragments_for("dev");
        assert_eq!(fragments.len(), 2);
    }
}
