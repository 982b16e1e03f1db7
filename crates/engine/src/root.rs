//! The root scene: process-wide bootstrap concerns for one playbook run.
//!
//! The root owns what nested scenes only borrow: the tag registry, the
//! exported-template registry, the background-job registry, process-exit
//! hooks, the captured environment, and the encrypted-artifact lifecycle.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use runbook_types::{PlaybookDocument, PlaybookManifest, coerce_to_declared_type};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    crypto,
    group::Group,
    proxy::{ElementProxy, ProxyContext},
    registry::TagRegistry,
    scene::Scene,
    scope::VariableScope,
};

/// Extension of the compiled, encrypted sidecar artifact.
const ARTIFACT_EXTENSION: &str = "rbc";

/// Knobs for loading a playbook.
#[derive(Default)]
pub struct RootSceneOptions {
    /// Password for opening a sealed artifact (and for compiling one when
    /// the manifest declares it).
    pub password: Option<String>,
    /// External variables file; overrides the manifest's `vars_file`.
    pub vars_file: Option<PathBuf>,
    /// Tag registry; defaults to the built-in catalogue.
    pub registry: Option<Arc<TagRegistry>>,
    /// Environment snapshot; defaults to the process environment.
    pub env: Option<HashMap<String, String>>,
}

/// Execution context that owns the whole scene tree.
pub struct RootScene {
    scene: Arc<Scene>,
    registry: Arc<TagRegistry>,
    manifest: PlaybookManifest,
    source_path: Option<PathBuf>,
    loaded_from_artifact: bool,
    password: Option<String>,
    vars_file: Option<PathBuf>,
    env: HashMap<String, String>,
    declared_vars: Mutex<Option<Map<String, Value>>>,
    templates: Mutex<HashMap<String, IndexMap<String, Value>>>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
    exit_hooks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
    compiled_path: Mutex<Option<PathBuf>>,
}

impl std::fmt::Debug for RootScene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootScene")
            .field("source_path", &self.source_path)
            .field("loaded_from_artifact", &self.loaded_from_artifact)
            .finish_non_exhaustive()
    }
}

impl RootScene {
    /// Loads a playbook from disk, transparently opening a sealed artifact.
    pub fn from_path(path: impl AsRef<Path>, options: RootSceneOptions) -> Result<Arc<RootScene>> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("failed to read playbook file: {}", path.display()))?;

        let (content, loaded_from_artifact) = if crypto::is_sealed(&bytes) {
            let plaintext = crypto::unseal(&bytes, options.password.as_deref())?;
            (String::from_utf8(plaintext).context("sealed artifact does not contain UTF-8 YAML")?, true)
        } else {
            (String::from_utf8_lossy(&bytes).into_owned(), false)
        };

        Self::build(&content, options, Some(path.to_path_buf()), loaded_from_artifact)
    }

    /// Loads a playbook from an in-memory YAML document.
    pub fn from_content(content: &str, options: RootSceneOptions) -> Result<Arc<RootScene>> {
        Self::build(content, options, None, false)
    }

    fn build(
        content: &str,
        options: RootSceneOptions,
        source_path: Option<PathBuf>,
        loaded_from_artifact: bool,
    ) -> Result<Arc<RootScene>> {
        let document: PlaybookDocument = serde_yaml::from_str(content).context("playbook is not a step list or manifest")?;
        let manifest = document.into_manifest();

        let registry = options.registry.unwrap_or_else(TagRegistry::builtin);
        let env = options.env.unwrap_or_else(|| std::env::vars().collect());
        let password = manifest.password.clone().or(options.password);
        let vars_file = options
            .vars_file
            .or_else(|| manifest.vars_file.as_ref().map(PathBuf::from));
        let dir = source_path.as_ref().and_then(|path| path.parent().map(Path::to_path_buf));

        Ok(Arc::new_cyclic(|weak: &Weak<RootScene>| RootScene {
            scene: Scene::new(weak.clone(), VariableScope::default(), dir),
            registry,
            manifest,
            source_path,
            loaded_from_artifact,
            password,
            vars_file,
            env,
            declared_vars: Mutex::new(None),
            templates: Mutex::new(HashMap::new()),
            jobs: Mutex::new(Vec::new()),
            exit_hooks: Mutex::new(Vec::new()),
            compiled_path: Mutex::new(None),
        }))
    }

    /// The scene at the root of the tree.
    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    /// The tag registry consulted for every distinct tag construction.
    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    /// Environment snapshot captured at load time.
    pub fn environment(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Where the compiled artifact was written, once it has been.
    pub fn compiled_path(&self) -> Option<PathBuf> {
        self.lock(&self.compiled_path).clone()
    }

    /// Runs the playbook: bootstraps variables, interprets the top-level
    /// group, and compiles the sealed artifact after the first successful
    /// plain run of a password-protected playbook.
    pub async fn execute(self: &Arc<Self>) -> Result<Vec<Value>> {
        self.bootstrap_vars()?;

        let group = Group::new(self.manifest.runs.clone());
        let mut proxy = ElementProxy::new(Box::new(group), ProxyContext::new("group", self.scene.clone()));
        let outcome = proxy.execute(&Value::Null).await;
        proxy.dispose().await;
        let result = outcome?;

        let results = match result {
            Value::Array(items) => items,
            other => vec![other],
        };

        if self.password.is_some() && !self.loaded_from_artifact && self.source_path.is_some() {
            self.compile_artifact()?;
        }
        Ok(results)
    }

    /// Waits for outstanding detached jobs and notifies exit hooks.
    pub async fn dispose(&self) {
        let hooks = std::mem::take(&mut *self.lock(&self.exit_hooks));
        for hook in hooks {
            hook();
        }
        loop {
            let Some(job) = self.lock(&self.jobs).pop() else { break };
            if let Err(join_error) = job.await {
                warn!(error = %join_error, "detached job ended abnormally");
            }
        }
    }

    /// Aborts outstanding detached jobs instead of waiting for them.
    pub fn abort_background_jobs(&self) {
        for job in self.lock(&self.jobs).drain(..) {
            job.abort();
        }
    }

    /// Registers a detached task; the root's disposal waits for it.
    pub fn push_background_job(&self, job: JoinHandle<()>) {
        self.lock(&self.jobs).push(job);
    }

    /// Registers a shutdown notification for a long-lived element.
    pub fn register_exit_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        self.lock(&self.exit_hooks).push(hook);
    }

    /// Publishes a resolved property set for later inheritance.
    pub fn export_template(&self, name: &str, properties: IndexMap<String, Value>) {
        debug!(template = name, "exported template properties");
        self.lock(&self.templates).insert(name.to_string(), properties);
    }

    /// Merges one or more exported property sets, first listed winning on
    /// conflicts between templates.
    pub fn template_defaults(&self, names: &Value) -> Result<IndexMap<String, Value>> {
        let names: Vec<String> = match names {
            Value::String(single) => vec![single.clone()],
            Value::Array(many) => many
                .iter()
                .map(|entry| {
                    entry
                        .as_str()
                        .map(str::to_string)
                        .context("inherit marker entries must be template names")
                })
                .collect::<Result<_>>()?,
            other => bail!("inherit marker must be a template name or list of names, got {other}"),
        };

        let templates = self.lock(&self.templates);
        let mut merged = IndexMap::new();
        for name in names {
            let Some(properties) = templates.get(&name) else {
                bail!("template '{name}' has not been exported");
            };
            for (key, value) in properties {
                if !merged.contains_key(key) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(merged)
    }

    /// Merges declared vars, the vars file, and environment overrides into
    /// the root scope, in that priority order.
    fn bootstrap_vars(&self) -> Result<()> {
        let mut declared_guard = self.lock(&self.declared_vars);
        if declared_guard.is_some() {
            return Ok(());
        }

        let mut declared = match &self.manifest.vars {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => bail!("manifest 'vars' must be a mapping, got {other}"),
            None => Map::new(),
        };

        if let Some(vars_file) = &self.vars_file {
            let resolved = self.scene.resolve_path(&vars_file.to_string_lossy());
            let overlay = load_vars_file(&resolved)?;
            deep_merge(&mut declared, overlay);
        }

        let mut resolved = declared.clone();
        apply_env_overrides(&mut resolved, &self.env);

        let mut scope = self.scene.write_scope();
        for (name, value) in &resolved {
            scope.set_local(name.clone(), value.clone());
        }
        drop(scope);

        *declared_guard = Some(declared);
        Ok(())
    }

    /// Serializes the resolved document and writes the sealed sidecar.
    fn compile_artifact(&self) -> Result<PathBuf> {
        let source_path = self
            .source_path
            .as_ref()
            .context("cannot compile an artifact without a source path")?;
        let password = self.password.as_ref().context("cannot compile an artifact without a password")?;

        let declared = self.lock(&self.declared_vars).clone().unwrap_or_default();
        let resolved = PlaybookManifest {
            name: self.manifest.name.clone(),
            password: Some(password.clone()),
            vars: if declared.is_empty() { None } else { Some(Value::Object(declared)) },
            vars_file: None,
            runs: self.manifest.runs.clone(),
        };

        let plaintext = serde_yaml::to_string(&resolved).context("failed to serialize resolved playbook")?;
        let sealed = crypto::seal(plaintext.as_bytes(), password)?;
        let artifact_path = source_path.with_extension(ARTIFACT_EXTENSION);
        fs::write(&artifact_path, sealed)
            .with_context(|| format!("failed to write compiled artifact: {}", artifact_path.display()))?;
        debug!(path = %artifact_path.display(), "compiled playbook artifact");

        *self.lock(&self.compiled_path) = Some(artifact_path.clone());
        Ok(artifact_path)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_vars_file(path: &Path) -> Result<Map<String, Value>> {
    let content = fs::read_to_string(path).with_context(|| format!("failed to read vars file: {}", path.display()))?;
    let parsed: Value = if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
        serde_json::from_str(&content).with_context(|| format!("vars file is not valid JSON: {}", path.display()))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("vars file is not valid YAML: {}", path.display()))?
    };
    match parsed {
        Value::Object(map) => Ok(map),
        other => bail!("vars file must contain a mapping, got {other}"),
    }
}

fn deep_merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, overlay_value) in overlay {
        match (base.get_mut(&key), overlay_value) {
            (Some(Value::Object(base_child)), Value::Object(overlay_child)) => {
                deep_merge(base_child, overlay_child);
            }
            (_, overlay_value) => {
                base.insert(key, overlay_value);
            }
        }
    }
}

/// Overrides declared variables from the environment: underscore-joined
/// paths, case-insensitive, value coerced to the declared type.
fn apply_env_overrides(declared: &mut Map<String, Value>, env: &HashMap<String, String>) {
    let lowercased: HashMap<String, &String> = env.iter().map(|(key, value)| (key.to_ascii_lowercase(), value)).collect();
    let mut path = Vec::new();
    for (name, value) in declared.iter_mut() {
        path.push(name.clone());
        override_value(value, &mut path, &lowercased);
        path.pop();
    }
}

fn override_value(value: &mut Value, path: &mut Vec<String>, env: &HashMap<String, &String>) {
    if let Value::Object(children) = value {
        for (name, child) in children.iter_mut() {
            path.push(name.clone());
            override_value(child, path, env);
            path.pop();
        }
        return;
    }
    let env_name = path.join("_").to_ascii_lowercase();
    if let Some(raw) = env.get(&env_name) {
        *value = coerce_to_declared_type(value, raw);
    }
}
