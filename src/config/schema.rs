//! Configuration schema definitions.
//!
//! Extensions are configured through `STEADYBIT_*` environment variables only.
//! Every field is optional; an unset or empty variable means "use the default".

use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;

use envconfig::Envconfig;

/// How the extension HTTP server listens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Envconfig)]
pub struct ListenSpecification {
    /// Overrides the port passed to `listen` when set and non-zero.
    #[envconfig(from = "STEADYBIT_EXTENSION_PORT")]
    pub port: Option<u16>,

    /// Serve on a unix domain socket instead of TCP.
    #[envconfig(from = "STEADYBIT_EXTENSION_UNIX_SOCKET")]
    pub unix_socket: Option<PathBuf>,

    /// Server certificate chain (PEM).
    #[envconfig(from = "STEADYBIT_EXTENSION_TLS_SERVER_CERT")]
    pub tls_server_cert: Option<PathBuf>,

    /// Server private key (PEM).
    #[envconfig(from = "STEADYBIT_EXTENSION_TLS_SERVER_KEY")]
    pub tls_server_key: Option<PathBuf>,

    /// Files or directories with CA certificates for client authentication.
    #[envconfig(from = "STEADYBIT_EXTENSION_TLS_CLIENT_CAS", default = "")]
    pub tls_client_cas: PathList,

    #[envconfig(from = "STEADYBIT_EXTENSION_ENABLE_PPROF", default = "false")]
    pub enable_pprof: bool,
}

impl ListenSpecification {
    /// TLS is enabled as soon as any TLS setting is present.
    pub fn is_tls_enabled(&self) -> bool {
        self.tls_server_cert.is_some()
            || self.tls_server_key.is_some()
            || !self.tls_client_cas.is_empty()
    }

    /// Clients must present a certificate signed by one of the client CAs.
    pub fn requires_client_auth(&self) -> bool {
        !self.tls_client_cas.is_empty()
    }

    pub fn is_unix_socket_enabled(&self) -> bool {
        self.unix_socket.is_some()
    }

    /// The configured port, or `default` when unset or zero.
    pub fn effective_port(&self, default: u16) -> u16 {
        self.port.filter(|port| *port != 0).unwrap_or(default)
    }

    /// Treat empty values as unset.
    pub(crate) fn normalized(mut self) -> Self {
        self.unix_socket = self.unix_socket.filter(|p| !p.as_os_str().is_empty());
        self.tls_server_cert = self.tls_server_cert.filter(|p| !p.as_os_str().is_empty());
        self.tls_server_key = self.tls_server_key.filter(|p| !p.as_os_str().is_empty());
        self
    }
}

/// Dedicated port for the health probes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Envconfig)]
pub struct HealthSpecification {
    #[envconfig(from = "STEADYBIT_EXTENSION_HEALTH_PORT")]
    pub port: Option<u16>,
}

impl HealthSpecification {
    /// The configured probe port, or `default` when unset or zero.
    pub fn effective_port(&self, default: u16) -> u16 {
        self.port.filter(|port| *port != 0).unwrap_or(default)
    }
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Eq, Envconfig)]
pub struct LogSpecification {
    #[envconfig(from = "STEADYBIT_LOG_FORMAT", default = "text")]
    pub format: LogFormat,

    #[envconfig(from = "STEADYBIT_LOG_LEVEL", default = "info")]
    pub level: String,

    #[envconfig(from = "STEADYBIT_LOG_COLOR", default = "true")]
    pub color: bool,
}

impl Default for LogSpecification {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".to_string(),
            color: true,
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = Infallible;

    /// Anything but `json` selects the human readable format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("json") {
            Ok(LogFormat::Json)
        } else {
            Ok(LogFormat::Text)
        }
    }
}

/// Comma separated list of paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathList(Vec<PathBuf>);

impl PathList {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self(paths)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }
}

impl FromStr for PathList {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect(),
        ))
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for PathList {
    fn from_iter<T: IntoIterator<Item = P>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
