//! Resolution of the worker configuration from platform settings.
//!
//! The resolver is a pure function of the settings source: it reads the
//! recognised settings, validates them, and either produces a complete
//! [`WorkerConfiguration`] or reports the first setting that is missing or
//! malformed. It never touches the running worker.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;

use thiserror::Error;

use rolehost_config::settings::{
    ACCESS_KEY_SETTING, MAX_CONCURRENCY_SETTING, MESSAGING_CONNECTION_SETTING, SECRET_KEY_SETTING,
    STORAGE_CONNECTION_SETTING, SettingsSource,
};

/// Backing services the worker connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EndpointKind {
    /// Durable storage for job state and artefacts.
    Storage,
    /// Messaging service used for job dispatch.
    Messaging,
}

impl EndpointKind {
    /// Every endpoint the configuration requires.
    pub const ALL: [Self; 2] = [Self::Storage, Self::Messaging];

    /// Name of the setting carrying this endpoint's connection string.
    #[must_use]
    pub fn setting_name(self) -> &'static str {
        match self {
            Self::Storage => STORAGE_CONNECTION_SETTING,
            Self::Messaging => MESSAGING_CONNECTION_SETTING,
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Storage => "storage",
            Self::Messaging => "messaging",
        };
        formatter.write_str(label)
    }
}

/// Errors raised when settings cannot be resolved into a configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required setting was absent or blank.
    #[error("required setting '{setting}' is missing")]
    Missing {
        /// Name of the absent setting.
        setting: &'static str,
    },
    /// A setting was present but unusable.
    #[error("setting '{setting}' is malformed: {reason}")]
    Malformed {
        /// Name of the offending setting.
        setting: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigurationError {
    /// Name of the setting that caused the failure.
    #[must_use]
    pub fn setting(&self) -> &'static str {
        match self {
            Self::Missing { setting } | Self::Malformed { setting, .. } => setting,
        }
    }

    fn malformed(setting: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            setting,
            reason: reason.into(),
        }
    }
}

/// Non-blank endpoint connection string.
///
/// The value is otherwise opaque: `key=value;...` strings and plain endpoint
/// addresses are both passed through. The raw value may carry secrets, so
/// `Display` and `Debug` render only the keys of `key=value` segments, and
/// `***` for anything else.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString(String);

impl ConnectionString {
    /// Accepts `raw` as the value of `setting` unless it is blank.
    pub fn parse(setting: &'static str, raw: &str) -> Result<Self, ConfigurationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigurationError::Missing { setting });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the raw connection string, secrets included.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Iterates the keys of `key=value` segments in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0
            .split(';')
            .filter_map(|segment| segment.split_once('='))
            .map(|(key, _)| key.trim())
            .filter(|key| !key.is_empty())
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for key in self.keys() {
            if !first {
                formatter.write_str(";")?;
            }
            write!(formatter, "{key}=***")?;
            first = false;
        }
        if first {
            formatter.write_str("***")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_tuple("ConnectionString")
            .field(&format_args!("{self}"))
            .finish()
    }
}

/// Access key pair used by engines that authenticate outside the
/// connection strings.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    /// Access key identifier.
    #[must_use]
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Secret key.
    #[must_use]
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// Everything the worker needs to reach its backing services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfiguration {
    endpoints: BTreeMap<EndpointKind, ConnectionString>,
    credentials: Option<Credentials>,
    max_concurrency: Option<NonZeroU32>,
}

impl WorkerConfiguration {
    /// Builds a configuration from validated connection strings.
    #[must_use]
    pub fn new(storage: ConnectionString, messaging: ConnectionString) -> Self {
        let endpoints = BTreeMap::from([
            (EndpointKind::Storage, storage),
            (EndpointKind::Messaging, messaging),
        ]);
        Self {
            endpoints,
            credentials: None,
            max_concurrency: None,
        }
    }

    /// Connection string for the given endpoint.
    #[must_use]
    pub fn endpoint(&self, kind: EndpointKind) -> Option<&ConnectionString> {
        self.endpoints.get(&kind)
    }

    /// Storage connection string.
    #[must_use]
    pub fn storage(&self) -> Option<&ConnectionString> {
        self.endpoint(EndpointKind::Storage)
    }

    /// Messaging connection string.
    #[must_use]
    pub fn messaging(&self) -> Option<&ConnectionString> {
        self.endpoint(EndpointKind::Messaging)
    }

    /// Optional access key pair.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Concurrency bound requested through the settings, if any.
    #[must_use]
    pub fn max_concurrency(&self) -> Option<NonZeroU32> {
        self.max_concurrency
    }
}

/// Reads and validates the recognised settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigurationResolver;

impl ConfigurationResolver {
    /// Builds a resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Produces a complete configuration or the first validation failure.
    pub fn resolve(
        &self,
        settings: &dyn SettingsSource,
    ) -> Result<WorkerConfiguration, ConfigurationError> {
        let mut endpoints = BTreeMap::new();
        for kind in EndpointKind::ALL {
            let setting = kind.setting_name();
            let raw = read_required(settings, setting)?;
            endpoints.insert(kind, ConnectionString::parse(setting, &raw)?);
        }

        Ok(WorkerConfiguration {
            endpoints,
            credentials: resolve_credentials(settings)?,
            max_concurrency: resolve_concurrency(settings)?,
        })
    }
}

fn read_required(
    settings: &dyn SettingsSource,
    setting: &'static str,
) -> Result<String, ConfigurationError> {
    read_optional(settings, setting).ok_or(ConfigurationError::Missing { setting })
}

fn read_optional(settings: &dyn SettingsSource, setting: &str) -> Option<String> {
    settings
        .setting(setting)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn resolve_credentials(
    settings: &dyn SettingsSource,
) -> Result<Option<Credentials>, ConfigurationError> {
    let access = read_optional(settings, ACCESS_KEY_SETTING);
    let secret = read_optional(settings, SECRET_KEY_SETTING);
    match (access, secret) {
        (Some(access_key), Some(secret_key)) => Ok(Some(Credentials {
            access_key,
            secret_key,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigurationError::malformed(
            SECRET_KEY_SETTING,
            "an access key was supplied without its secret key",
        )),
        (None, Some(_)) => Err(ConfigurationError::malformed(
            ACCESS_KEY_SETTING,
            "a secret key was supplied without its access key",
        )),
    }
}

fn resolve_concurrency(
    settings: &dyn SettingsSource,
) -> Result<Option<NonZeroU32>, ConfigurationError> {
    let Some(raw) = read_optional(settings, MAX_CONCURRENCY_SETTING) else {
        return Ok(None);
    };
    raw.parse::<NonZeroU32>().map(Some).map_err(|_| {
        ConfigurationError::malformed(
            MAX_CONCURRENCY_SETTING,
            format!("expected a positive integer, found '{raw}'"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use rolehost_config::settings::SettingsSnapshot;
    use rstest::rstest;

    const STORAGE: &str = "AccountName=jobs;AccountKey=c2VjcmV0";
    const MESSAGING: &str = "Endpoint=sb://queue.example;SharedAccessKey=a2V5";

    fn complete() -> SettingsSnapshot {
        SettingsSnapshot::from_pairs([
            (STORAGE_CONNECTION_SETTING, STORAGE),
            (MESSAGING_CONNECTION_SETTING, MESSAGING),
        ])
    }

    #[rstest]
    fn resolves_complete_settings() {
        let configuration = ConfigurationResolver::new()
            .resolve(&complete())
            .expect("configuration");

        assert_eq!(
            configuration.storage().map(ConnectionString::expose),
            Some(STORAGE)
        );
        assert_eq!(
            configuration.messaging().map(ConnectionString::expose),
            Some(MESSAGING)
        );
        assert!(configuration.credentials().is_none());
        assert!(configuration.max_concurrency().is_none());
    }

    #[rstest]
    #[case(STORAGE_CONNECTION_SETTING)]
    #[case(MESSAGING_CONNECTION_SETTING)]
    fn missing_endpoint_is_reported(#[case] setting: &'static str) {
        let settings = complete().without(setting);

        let error = ConfigurationResolver::new()
            .resolve(&settings)
            .expect_err("missing setting should fail");

        assert_eq!(error, ConfigurationError::Missing { setting });
    }

    #[rstest]
    fn blank_endpoint_counts_as_missing() {
        let settings = complete().with(STORAGE_CONNECTION_SETTING, "   ");

        let error = ConfigurationResolver::new()
            .resolve(&settings)
            .expect_err("blank setting should fail");

        assert_eq!(error.setting(), STORAGE_CONNECTION_SETTING);
        assert!(matches!(error, ConfigurationError::Missing { .. }));
    }

    #[rstest]
    fn opaque_endpoints_resolve_unchanged() {
        let settings = SettingsSnapshot::from_pairs([
            (STORAGE_CONNECTION_SETTING, "S1"),
            (MESSAGING_CONNECTION_SETTING, "M1"),
        ]);

        let configuration = ConfigurationResolver::new()
            .resolve(&settings)
            .expect("configuration");

        assert_eq!(
            configuration.storage().map(ConnectionString::expose),
            Some("S1")
        );
        assert_eq!(
            configuration.messaging().map(ConnectionString::expose),
            Some("M1")
        );
    }

    #[rstest]
    #[case("redis://cache.internal:6379")]
    #[case("UseDevelopmentStorage")]
    fn plain_endpoints_render_fully_redacted(#[case] raw: &str) {
        let connection =
            ConnectionString::parse(STORAGE_CONNECTION_SETTING, raw).expect("connection string");

        assert_eq!(connection.expose(), raw);
        assert_eq!(connection.to_string(), "***");
        assert!(!format!("{connection:?}").contains(raw));
    }

    #[rstest]
    fn connection_strings_render_without_secrets() {
        let connection = ConnectionString::parse(STORAGE_CONNECTION_SETTING, STORAGE)
            .expect("connection string");

        assert_eq!(connection.to_string(), "AccountName=***;AccountKey=***");
        assert!(!format!("{connection:?}").contains("c2VjcmV0"));
    }

    #[rstest]
    fn trailing_separator_is_tolerated() {
        let connection =
            ConnectionString::parse(STORAGE_CONNECTION_SETTING, "AccountName=jobs;")
                .expect("connection string");

        assert_eq!(connection.keys().collect::<Vec<_>>(), vec!["AccountName"]);
    }

    #[rstest]
    fn credentials_require_both_halves() {
        let settings = complete().with(ACCESS_KEY_SETTING, "AKIDEXAMPLE");

        let error = ConfigurationResolver::new()
            .resolve(&settings)
            .expect_err("half a credential pair should fail");

        assert!(matches!(
            error,
            ConfigurationError::Malformed { setting, .. } if setting == SECRET_KEY_SETTING
        ));
    }

    #[rstest]
    fn credentials_are_resolved_and_redacted() {
        let settings = complete()
            .with(ACCESS_KEY_SETTING, "AKIDEXAMPLE")
            .with(SECRET_KEY_SETTING, "wJalrXUtnFEMI");

        let configuration = ConfigurationResolver::new()
            .resolve(&settings)
            .expect("configuration");
        let credentials = configuration.credentials().expect("credentials");

        assert_eq!(credentials.access_key(), "AKIDEXAMPLE");
        assert_eq!(credentials.secret_key(), "wJalrXUtnFEMI");
        assert!(!format!("{credentials:?}").contains("wJalrXUtnFEMI"));
    }

    #[rstest]
    #[case("0")]
    #[case("-4")]
    #[case("many")]
    fn concurrency_must_be_a_positive_integer(#[case] raw: &str) {
        let settings = complete().with(MAX_CONCURRENCY_SETTING, raw);

        let error = ConfigurationResolver::new()
            .resolve(&settings)
            .expect_err("invalid bound should fail");

        assert_eq!(error.setting(), MAX_CONCURRENCY_SETTING);
    }

    #[rstest]
    fn concurrency_is_resolved() {
        let settings = complete().with(MAX_CONCURRENCY_SETTING, "32");

        let configuration = ConfigurationResolver::new()
            .resolve(&settings)
            .expect("configuration");

        assert_eq!(configuration.max_concurrency(), NonZeroU32::new(32));
    }
}
