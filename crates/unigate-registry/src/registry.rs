use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use unigate_adapter::{
    Adapter, CustomHttpAdapter, DuplexSocketAdapter, InputFormat, OutputFormat, PassThroughAdapter,
    SubprocessAdapter,
};
use unigate_common::{env, GatewayError};
use unigate_convert::ConverterRegistry;
use unigate_protocol::{ModelDescriptor, ModelList};
use unigate_resilience::ModelResilience;

use crate::config::{is_comment_entry, AdapterKind, ConfigDocument, ModelEntry};

/// Everything the Router needs to dispatch one model: the adapter, and the
/// per-model resilience state (breaker/limiter are long-lived across calls,
/// retry policy is a plain value).
pub struct RegistryEntry {
    pub adapter: Arc<dyn Adapter>,
    pub resilience: Arc<ModelResilience>,
    pub descriptor: ModelDescriptor,
}

/// The immutable snapshot produced by one `load`/`reload` cycle. In-flight
/// requests keep their `Arc<RegistryEntry>` alive even after a reload
/// replaces the snapshot, so an in-flight request keeps running against
/// the old Adapter set until it completes.
pub struct Registry {
    entries: HashMap<String, Arc<RegistryEntry>>,
}

impl Registry {
    pub fn get(&self, model_id: &str) -> Option<Arc<RegistryEntry>> {
        self.entries.get(model_id).cloned()
    }

    pub fn list(&self) -> ModelList {
        let mut data: Vec<ModelDescriptor> = self
            .entries
            .values()
            .map(|e| e.descriptor.clone())
            .collect();
        data.sort_by(|a, b| a.id.cmp(&b.id));
        ModelList::new(data)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loads a model configuration file and builds one Adapter per enabled,
/// available entry, resolving `ENV:<NAME>` secrets once. Unavailable
/// entries (missing secrets, bad shape) are logged and skipped rather than
/// failing the whole load.
pub fn load(path: &Path) -> Result<Registry, GatewayError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::InternalError(format!("read model config {path:?}: {e}")))?;
    load_from_str(&raw)
}

pub fn load_from_str(raw: &str) -> Result<Registry, GatewayError> {
    let document: ConfigDocument = serde_json::from_str(raw)
        .map_err(|e| GatewayError::InternalError(format!("parse model config: {e}")))?;

    let converters = ConverterRegistry::default();
    let client = reqwest::Client::new();
    let mut entries = HashMap::new();

    for value in document.models {
        if is_comment_entry(&value) {
            continue;
        }
        let entry: ModelEntry = match serde_json::from_value(value) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("skipping malformed model entry: {e}");
                continue;
            }
        };
        if !entry.enabled {
            tracing::info!(model = %entry.id, "model entry disabled, skipping");
            continue;
        }

        let id = entry.id.clone();
        match build_entry(&entry, &converters, &client) {
            Some(built) if built.adapter.is_available() => {
                entries.insert(id, Arc::new(built));
            }
            Some(_) => {
                tracing::warn!(model = %id, "adapter reported unavailable, skipping");
            }
            None => {
                tracing::warn!(model = %id, "could not resolve secrets, skipping");
            }
        }
    }

    Ok(Registry { entries })
}

fn build_entry(
    entry: &ModelEntry,
    converters: &ConverterRegistry,
    client: &reqwest::Client,
) -> Option<RegistryEntry> {
    let descriptor = ModelDescriptor::new(entry.id.clone(), owner_for(entry.adapter));
    let resilience = Arc::new(ModelResilience::new(resilience_config(entry)));

    let adapter: Arc<dyn Adapter> = match entry.adapter {
        AdapterKind::OpenaiCompat => {
            let base_url = entry.base_url.clone()?;
            let api_key = match &entry.api_key {
                Some(raw) => Some(env::resolve(raw)?),
                None => None,
            };
            let upstream_model = entry.model.clone().unwrap_or_else(|| entry.id.clone());
            Arc::new(PassThroughAdapter::new(
                client.clone(),
                base_url,
                upstream_model,
                entry.id.clone(),
                api_key,
            ))
        }
        AdapterKind::CustomHttp => {
            let base_url = entry.base_url.clone()?;
            let tag = entry
                .request_format
                .clone()
                .unwrap_or_else(|| "openai_compat".to_string());
            let converter = converters.build(&tag)?;
            let secrets = resolve_secrets(entry)?;
            let upstream_model = entry.model.clone().unwrap_or_else(|| entry.id.clone());
            Arc::new(CustomHttpAdapter::new(
                client.clone(),
                Arc::from(converter),
                base_url,
                secrets,
                entry.id.clone(),
                upstream_model,
            ))
        }
        AdapterKind::Process => {
            let command = entry.command.clone()?;
            let env_vars = resolve_env_map(&entry.env)?;
            let input_format = parse_input_format(entry.input_format.as_deref());
            let output_format = parse_output_format(entry.output_format.as_deref());
            let timeout = Duration::from_secs(entry.timeout.unwrap_or(60));
            Arc::new(SubprocessAdapter::new(
                command,
                entry.args.clone(),
                entry.working_dir.clone().map(PathBuf::from),
                env_vars,
                input_format,
                output_format,
                timeout,
                entry.id.clone(),
            ))
        }
        AdapterKind::Websocket => {
            let addr = entry.endpoint.clone()?;
            let host = config_string(entry, "host").unwrap_or_default();
            let path = config_string(entry, "path").unwrap_or_default();
            let key_id = config_string(entry, "key_id").unwrap_or_default();
            let signing_key_raw = config_string(entry, "signing_key")
                .or_else(|| entry.api_key.clone())?;
            let signing_key = env::resolve(&signing_key_raw)?;
            Arc::new(DuplexSocketAdapter::new(
                addr, host, path, key_id, signing_key, entry.id.clone(),
            ))
        }
    };

    Some(RegistryEntry {
        adapter,
        resilience,
        descriptor,
    })
}

fn owner_for(kind: AdapterKind) -> &'static str {
    match kind {
        AdapterKind::OpenaiCompat => "pass_through",
        AdapterKind::CustomHttp => "custom_http",
        AdapterKind::Process => "subprocess",
        AdapterKind::Websocket => "duplex_socket",
    }
}

fn resilience_config(entry: &ModelEntry) -> unigate_resilience::ResilienceConfig {
    unigate_resilience::ResilienceConfig {
        retry: entry.retry.clone().unwrap_or_default(),
        breaker: unigate_resilience::BreakerConfig::default(),
        rate_limit: None,
    }
}

fn config_string(entry: &ModelEntry, key: &str) -> Option<String> {
    entry.config.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn resolve_secrets(entry: &ModelEntry) -> Option<unigate_convert::Secrets> {
    let mut secrets = HashMap::new();
    if let Some(raw) = &entry.api_key {
        secrets.insert("api_key".to_string(), env::resolve(raw)?);
    }
    if let Some(map) = entry.config.as_object() {
        for (key, value) in map {
            if let Some(raw) = value.as_str() {
                secrets.insert(key.clone(), env::resolve(raw)?);
            }
        }
    }
    Some(secrets)
}

fn resolve_env_map(env_map: &HashMap<String, String>) -> Option<HashMap<String, String>> {
    let mut resolved = HashMap::new();
    for (key, raw) in env_map {
        resolved.insert(key.clone(), env::resolve(raw)?);
    }
    Some(resolved)
}

fn parse_input_format(value: Option<&str>) -> InputFormat {
    match value {
        Some("messages_only_json") => InputFormat::MessagesOnlyJson,
        Some("prompt_text") => InputFormat::PromptText,
        Some("last_user_text") => InputFormat::LastUserText,
        _ => InputFormat::OpenaiJson,
    }
}

fn parse_output_format(value: Option<&str>) -> OutputFormat {
    match value {
        Some("content_json") => OutputFormat::ContentJson,
        Some("text") => OutputFormat::Text,
        _ => OutputFormat::OpenaiJson,
    }
}

/// Atomically swappable holder for the current [`Registry`] snapshot.
/// `reload` replaces the snapshot; readers holding an `Arc` from before the
/// swap keep using it until they drop it.
pub struct SharedRegistry {
    current: ArcSwap<Registry>,
    path: PathBuf,
}

impl SharedRegistry {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, GatewayError> {
        let path = path.into();
        let registry = load(&path)?;
        Ok(Self {
            current: ArcSwap::from_pointee(registry),
            path,
        })
    }

    pub fn current(&self) -> Arc<Registry> {
        self.current.load_full()
    }

    pub fn reload(&self) -> Result<(), GatewayError> {
        let registry = load(&self.path)?;
        self.current.store(Arc::new(registry));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comment_entries_and_disabled_entries() {
        let json = r#"{"models":[
            {"_comment": "placeholder"},
            {"id":"m1","adapter":"openai_compat","base_url":"https://x","model":"gpt","enabled":false}
        ]}"#;
        let registry = load_from_str(json).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn loads_available_openai_compat_entry() {
        let json = r#"{"models":[
            {"id":"m1","adapter":"openai_compat","base_url":"https://x","model":"gpt-test","api_key":"sk-test"}
        ]}"#;
        let registry = load_from_str(json).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("m1").is_some());
    }

    #[test]
    fn skips_entry_with_unresolved_env_secret() {
        unsafe {
            std::env::remove_var("UNIGATE_REGISTRY_TEST_MISSING");
        }
        let json = r#"{"models":[
            {"id":"m1","adapter":"openai_compat","base_url":"https://x","model":"gpt","api_key":"ENV:UNIGATE_REGISTRY_TEST_MISSING"}
        ]}"#;
        let registry = load_from_str(json).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn load_reads_config_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(
            file,
            r#"{{"models":[{{"id":"m1","adapter":"openai_compat","base_url":"https://x","model":"m"}}]}}"#
        )
        .unwrap();
        let registry = load(file.path()).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn list_is_sorted_by_id() {
        let json = r#"{"models":[
            {"id":"zeta","adapter":"openai_compat","base_url":"https://x","model":"m"},
            {"id":"alpha","adapter":"openai_compat","base_url":"https://x","model":"m"}
        ]}"#;
        let registry = load_from_str(json).unwrap();
        let list = registry.list();
        assert_eq!(list.data[0].id, "alpha");
        assert_eq!(list.data[1].id, "zeta");
    }
}
