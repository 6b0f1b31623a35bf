//! The step: terminal unit of the execution tree.
//!
//! Setup merges inherited fields and canonicalizes the step exactly once:
//! a language is sugar for a predefined plugin image, a plugin replaces
//! the user command with its entrypoint, a service generates a deploy
//! script. Run selects an engine, builds a command spec and drives a
//! command executor.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::command::{CommandSpec, RunEnv};
use crate::context::{Progress, RunContext};
use crate::engine;
use crate::error::{Error, Result};
use crate::inherit::{Inherited, merge_env, merge_str};
use crate::plugin::{self, Plugin};
use crate::service::Service;
use crate::state::{State, settle};
use crate::DEFAULT_TIMEOUT;

/// Language of a step, sugar for a predefined plugin image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Language {
    /// e.g. "node", "go", "python"
    pub name: String,
    /// e.g. "22", "1.24", "3.13"
    pub version: String,
}

impl Language {
    fn image(&self) -> String {
        let version = if self.version.is_empty() {
            "latest"
        } else {
            &self.version
        };
        format!("ghcr.io/pipeline/pipeline-language-{}:{version}", self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Step {
    pub name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub workdir: String,

    /// Engine URI or bare executor name; empty selects host/docker.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub engine: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_registry: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_registry_username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_registry_password: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub shell: String,

    /// Timeout in seconds, default 86400 (1 day).
    #[serde(skip_serializing_if = "crate::is_zero")]
    pub timeout: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<Plugin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

impl Step {
    /// Set up the step: merge missing fields from the parent, normalize
    /// plugin/language/service into a finalized command, default the
    /// timeout and initialize state.
    ///
    /// The rewrite is a canonical pass that runs exactly once; a step
    /// whose state is already initialized is left untouched.
    pub fn setup(&mut self, id: &str, parent: &Inherited) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }

        merge_str(&mut self.image, &parent.image);
        merge_str(&mut self.workdir, &parent.workdir);
        merge_str(&mut self.image_registry, &parent.image_registry);
        merge_str(
            &mut self.image_registry_username,
            &parent.image_registry_username,
        );
        merge_str(
            &mut self.image_registry_password,
            &parent.image_registry_password,
        );
        merge_env(&mut self.environment, &parent.environment);
        if self.timeout == 0 {
            self.timeout = parent.timeout;
        }

        if let Some(language) = &self.language {
            if self.plugin.is_some() {
                return Err(Error::Validation(
                    "language and plugin cannot both be set".into(),
                ));
            }
            if language.name.is_empty() {
                return Err(Error::Validation("language name is required".into()));
            }
            self.plugin = Some(Plugin {
                image: language.image(),
                inherit_env: true,
                ..Default::default()
            });
        }

        if self.service.is_some() && self.plugin.is_some() {
            return Err(Error::Validation(
                "service cannot be combined with a plugin or language".into(),
            ));
        }

        if self.plugin.is_some() {
            self.apply_plugin();
        } else if let Some(service) = self.service.clone() {
            self.command = service.build_command()?;
            self.environment
                .insert("PIPELINE_SERVICE_TYPE".into(), service.kind.clone());
            self.environment
                .insert("PIPELINE_SERVICE_NAME".into(), service.name.clone());
            self.environment
                .insert("PIPELINE_SERVICE_VERSION".into(), service.version.clone());
        }

        if self.timeout == 0 {
            self.timeout = DEFAULT_TIMEOUT;
        }

        self.state = Some(State::running(id));

        Ok(())
    }

    fn apply_plugin(&mut self) {
        let Some(mut plugin) = self.plugin.take() else {
            return;
        };

        if plugin.entrypoint.is_empty() {
            plugin.entrypoint = plugin::DEFAULT_ENTRYPOINT.to_string();
        }

        self.image = plugin.image.clone();
        merge_str(&mut self.image_registry, &plugin.image_registry);
        merge_str(
            &mut self.image_registry_username,
            &plugin.image_registry_username,
        );
        merge_str(
            &mut self.image_registry_password,
            &plugin.image_registry_password,
        );

        let original = std::mem::take(&mut self.command);
        self.command = plugin::guard_command(&plugin.entrypoint);

        let inherited = std::mem::take(&mut self.environment);
        let mut environment = if plugin.inherit_env {
            inherited.clone()
        } else {
            HashMap::new()
        };
        environment.insert("PIPELINE_PLUGIN_COMMAND".into(), BASE64.encode(original));
        for (key, value) in &plugin.settings {
            environment.insert(
                plugin::settings_key(key),
                plugin::resolve_setting(value, &inherited),
            );
        }
        self.environment = environment;

        self.plugin = Some(plugin);
    }

    /// Run the step command through the engine's executor.
    pub async fn run(&mut self, ctx: &RunContext, env: &RunEnv, cfg: &Progress) -> Result<()> {
        let Some(id) = self.state.as_ref().map(|s| s.id.clone()) else {
            return Err(Error::Validation("step must be set up before running".into()));
        };

        let label = cfg.label("step", &self.name);
        env.io.stdout.append_line(&format!("{label} start"));
        if let Some(plugin) = &self.plugin {
            env.io
                .stdout
                .append_line(&format!("{label} use plugin => {}", plugin.image));
        }

        let scope = ctx.child_with_timeout(self.timeout);
        let result = self.execute(&scope, env, &id).await;
        env.io.stdout.append_line(&format!("{label} done"));

        match self.state.as_mut() {
            Some(state) => settle(state, "step", self.timeout, &scope, result),
            None => result,
        }
    }

    async fn execute(&self, scope: &RunContext, env: &RunEnv, id: &str) -> Result<()> {
        let engine = engine::resolve(&self.engine, &self.image)?;
        let executor = env
            .executors
            .get(&engine.name)
            .ok_or_else(|| Error::UnsupportedEngine(engine.name.clone()))?;

        let spec = CommandSpec {
            id: id.to_string(),
            command: self.command.clone(),
            environment: self.environment.clone(),
            workdir: self.workdir.clone(),
            shell: if self.shell.is_empty() {
                "sh".to_string()
            } else {
                self.shell.clone()
            },
            image: self.image.clone(),
            image_registry: self.image_registry.clone(),
            image_registry_username: self.image_registry_username.clone(),
            image_registry_password: self.image_registry_password.clone(),
            engine,
        };

        let token = scope.command_token();
        // Make sure the deadline watcher never outlives this command.
        let _guard = token.clone().drop_guard();
        executor.run(&spec, &env.io, token).await
    }
}
