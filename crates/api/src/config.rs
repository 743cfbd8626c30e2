//! Types for use when configuring vault2 modules.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> VaultResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| VaultError::failed_src("encode", e))?,
    )
    .map_err(|e| VaultError::failed_src("decode", e))
}

/// Denotes a type used to configure a specific vault2 module.
///
/// These types hold configuration that cannot be changed at runtime, the
/// likes of which might be found in a configuration file. Serialisation
/// should be tolerant to missing properties, setting sane defaults.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

/// Vault configuration.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// When vault2 is generating a default or example configuration file, it
    /// passes a mutable reference of this struct to each module in use; the
    /// module calls this to contribute its default parameters to that file.
    pub fn add_default_module_config<M: ModConfig>(
        &mut self,
        module_name: String,
    ) -> VaultResult<()> {
        if self.0.contains_key(&module_name) {
            return Err(VaultError::failed(format!(
                "refusing to overwrite conflicting module name: {module_name}"
            )));
        }
        self.0.insert(module_name, tc(&M::default())?);
        Ok(())
    }

    /// Extract a module config. A missing module section yields the default;
    /// this config is loaded from disk and can be edited by humans.
    pub fn get_module_config<M: ModConfig>(
        &self,
        module_name: &str,
    ) -> VaultResult<M> {
        self.0
            .get(module_name)
            .map(tc)
            .unwrap_or_else(|| Ok(M::default()))
    }
}
