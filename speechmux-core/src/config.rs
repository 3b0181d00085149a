//! Client configuration.
//!
//! A [`ClientConfig`] is read from JSON, normalized, optionally overridden
//! from `SPEECHMUX_*` environment variables and finally flattened into the
//! ordered `(key, value)` pairs handed to `Engine::configure`. Keys are not
//! validated beyond that; the engine decides what it understands.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SpeechMuxError};

pub const DEFAULT_RECONN_INTERVAL_MS: u32 = 20_000;
pub const DEFAULT_PING_INTERVAL_MS: u32 = 30_000;
pub const DEFAULT_NO_RESP_TIMEOUT_MS: u32 = 45_000;

const MIN_INTERVAL_MS: u32 = 1_000;
const MAX_INTERVAL_MS: u32 = 600_000;

pub const DEFAULT_DISPATCH_THREAD: &str = "speechmux-dispatch";

/// Prefix of environment variables read by [`ClientConfig::apply_env_overrides`].
pub const ENV_PREFIX: &str = "SPEECHMUX_";

/// Connection and authentication options applied before `prepare`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrepareOptions {
    pub host: String,
    pub port: u16,
    pub branch: String,
    pub key: String,
    #[serde(alias = "device_type_id")]
    pub device_type_id: String,
    #[serde(alias = "device_id")]
    pub device_id: String,
    pub secret: String,
    #[serde(alias = "api_version")]
    pub api_version: String,
    #[serde(alias = "reconn_interval")]
    pub reconn_interval: u32,
    #[serde(alias = "ping_interval")]
    pub ping_interval: u32,
    #[serde(alias = "no_resp_timeout")]
    pub no_resp_timeout: u32,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 443,
            branch: "/api".to_string(),
            key: String::new(),
            device_type_id: String::new(),
            device_id: String::new(),
            secret: String::new(),
            api_version: "1".to_string(),
            reconn_interval: DEFAULT_RECONN_INTERVAL_MS,
            ping_interval: DEFAULT_PING_INTERVAL_MS,
            no_resp_timeout: DEFAULT_NO_RESP_TIMEOUT_MS,
        }
    }
}

impl PrepareOptions {
    fn normalize(&mut self) {
        for field in [
            &mut self.host,
            &mut self.branch,
            &mut self.key,
            &mut self.device_type_id,
            &mut self.device_id,
            &mut self.secret,
            &mut self.api_version,
        ] {
            trim_in_place(field);
        }
        if self.api_version.is_empty() {
            self.api_version = "1".to_string();
        }
        self.reconn_interval = clamp_interval(self.reconn_interval);
        self.ping_interval = clamp_interval(self.ping_interval);
        self.no_resp_timeout = clamp_interval(self.no_resp_timeout);
    }

    fn push_pairs(&self, pairs: &mut Vec<(String, String)>) {
        push_non_empty(pairs, "host", &self.host);
        if self.port != 0 {
            push_non_empty(pairs, "port", &self.port.to_string());
        }
        push_non_empty(pairs, "branch", &self.branch);
        push_non_empty(pairs, "key", &self.key);
        push_non_empty(pairs, "device_type_id", &self.device_type_id);
        push_non_empty(pairs, "device_id", &self.device_id);
        push_non_empty(pairs, "secret", &self.secret);
        push_non_empty(pairs, "api_version", &self.api_version);
        push_non_empty(pairs, "reconn_interval", &self.reconn_interval.to_string());
        push_non_empty(pairs, "ping_interval", &self.ping_interval.to_string());
        push_non_empty(pairs, "no_resp_timeout", &self.no_resp_timeout.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    Zh,
    En,
}

impl Lang {
    pub fn as_str(self) -> &'static str {
        match self {
            Lang::Zh => "zh",
            Lang::En => "en",
        }
    }
}

/// Audio codec of voice input or synthesized output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Pcm,
    Opu,
    Opu2,
    Mp3,
}

impl Codec {
    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Pcm => "pcm",
            Codec::Opu => "opu",
            Codec::Opu2 => "opu2",
            Codec::Mp3 => "mp3",
        }
    }
}

/// Where end-of-speech is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadMode {
    #[default]
    Local,
    Cloud,
}

impl VadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            VadMode::Local => "local",
            VadMode::Cloud => "cloud",
        }
    }
}

/// Recognition / combined request options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpeechOptions {
    pub lang: Lang,
    pub codec: Codec,
    #[serde(alias = "vad_mode")]
    pub vad_mode: VadMode,
    #[serde(alias = "no_nlp")]
    pub no_nlp: bool,
    #[serde(alias = "no_intermediate_asr")]
    pub no_intermediate_asr: bool,
}

impl SpeechOptions {
    fn push_pairs(&self, pairs: &mut Vec<(String, String)>) {
        push_non_empty(pairs, "lang", self.lang.as_str());
        push_non_empty(pairs, "codec", self.codec.as_str());
        push_non_empty(pairs, "vad_mode", self.vad_mode.as_str());
        push_non_empty(pairs, "no_nlp", bool_str(self.no_nlp));
        push_non_empty(pairs, "no_intermediate_asr", bool_str(self.no_intermediate_asr));
    }
}

/// Synthesis options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TtsOptions {
    pub codec: Codec,
    pub declaimer: String,
    #[serde(alias = "sample_rate")]
    pub samplerate: u32,
}

impl Default for TtsOptions {
    fn default() -> Self {
        Self {
            codec: Codec::Pcm,
            declaimer: "zh".to_string(),
            samplerate: 24_000,
        }
    }
}

impl TtsOptions {
    fn push_pairs(&self, pairs: &mut Vec<(String, String)>) {
        push_non_empty(pairs, "codec", self.codec.as_str());
        push_non_empty(pairs, "declaimer", &self.declaimer);
        if self.samplerate != 0 {
            push_non_empty(pairs, "samplerate", &self.samplerate.to_string());
        }
    }
}

/// Dispatch thread tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DispatchConfig {
    #[serde(alias = "thread_name")]
    pub thread_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_DISPATCH_THREAD.to_string(),
        }
    }
}

/// Everything a client needs before `prepare`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub prepare: PrepareOptions,
    pub speech: Option<SpeechOptions>,
    pub tts: Option<TtsOptions>,
    pub dispatch: DispatchConfig,
}

impl ClientConfig {
    /// Parse and normalize a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: ClientConfig = serde_json::from_str(json)?;
        config.normalize();
        Ok(config)
    }

    pub fn normalize(&mut self) {
        self.prepare.normalize();
        if let Some(tts) = self.tts.as_mut() {
            trim_in_place(&mut tts.declaimer);
        }
        trim_in_place(&mut self.dispatch.thread_name);
        if self.dispatch.thread_name.is_empty() {
            self.dispatch.thread_name = DEFAULT_DISPATCH_THREAD.to_string();
        }
    }

    /// Override connection options from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(|name| std::env::var(name).ok())
    }

    /// Override connection options from `lookup`, which maps a full variable
    /// name (`SPEECHMUX_HOST`, ...) to its value.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let p = &mut self.prepare;

        if let Some(v) = var("HOST") {
            p.host = v;
        }
        if let Some(v) = var("PORT") {
            p.port = v
                .trim()
                .parse()
                .map_err(|e| SpeechMuxError::Config(format!("{ENV_PREFIX}PORT={v:?}: {e}")))?;
        }
        for (suffix, field) in [
            ("BRANCH", &mut p.branch),
            ("KEY", &mut p.key),
            ("DEVICE_TYPE_ID", &mut p.device_type_id),
            ("DEVICE_ID", &mut p.device_id),
            ("SECRET", &mut p.secret),
            ("API_VERSION", &mut p.api_version),
        ] {
            if let Some(v) = var(suffix) {
                debug!(variable = suffix, "configuration overridden from environment");
                *field = v;
            }
        }
        self.normalize();
        Ok(())
    }

    /// Ordered `(key, value)` pairs: connection options, then speech, then
    /// synthesis options. Empty values are dropped.
    pub fn config_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        self.prepare.push_pairs(&mut pairs);
        if let Some(speech) = &self.speech {
            speech.push_pairs(&mut pairs);
        }
        if let Some(tts) = &self.tts {
            tts.push_pairs(&mut pairs);
        }
        pairs
    }
}

/// Read, parse and normalize a JSON config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ClientConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let config = ClientConfig::from_json_str(&text)?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn trim_in_place(s: &mut String) {
    let trimmed = s.trim();
    if trimmed.len() != s.len() {
        *s = trimmed.to_string();
    }
}

fn clamp_interval(ms: u32) -> u32 {
    ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS)
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

fn push_non_empty(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    if !value.is_empty() {
        pairs.push((key.to_string(), value.to_string()));
    }
}
