//! Election runtime configuration.

use std::time::Duration;

use anyerror::AnyError;
use clap::Parser;

use crate::config::error::ConfigError;

/// Informational-message verbosity of the election engine.
///
/// Failures are always logged at `warn`/`error`; this only selects the level
/// of the routine state-machine narration (acquisition outcomes, renewals,
/// transitions).
#[derive(Clone, Copy, Debug)]
#[derive(PartialEq, Eq)]
#[derive(serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAtLevel {
    /// Narrate at `info`.
    Log,
    /// Narrate at `debug`.
    Debug,
}

fn parse_log_at_level(src: &str) -> Result<LogAtLevel, ConfigError> {
    match src {
        "log" => Ok(LogAtLevel::Log),
        "debug" => Ok(LogAtLevel::Debug),
        _ => Err(ConfigError::InvalidLogLevel {
            invalid: src.to_string(),
        }),
    }
}

/// The smallest accepted renewal interval.
///
/// Below this the derived lease duration (`2 x renewal_interval`) rounds to
/// zero seconds and every lease would be born expired.
const MIN_RENEWAL_INTERVAL: u64 = 500;

/// Runtime configuration for a leader-election participant.
///
/// Create a configuration, optionally customize fields, validate it, and
/// pass it to [`Elector::new`]:
///
/// ```ignore
/// use std::sync::Arc;
/// use elector::Config;
///
/// let config = Config {
///     lease_name: "scheduler-leader".to_string(),
///     renewal_interval: 5_000,
///     ..Default::default()
/// };
/// let config = Arc::new(config.validate()?);
/// ```
///
/// The lease duration is not an independent option: it is always twice the
/// renewal interval, so one missed renewal still leaves a full interval of
/// safety margin before peers may take over.
///
/// [`Elector::new`]: crate::Elector::new
#[derive(Clone, Debug, Parser)]
#[derive(PartialEq, Eq)]
#[derive(serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Name of the lease record all participants contend for.
    #[clap(long, default_value = "elector-leader-election")]
    pub lease_name: String,

    /// Namespace the lease record lives in.
    #[clap(long, default_value = "default")]
    pub namespace: String,

    /// The interval in milliseconds at which the leader renews its lease.
    #[clap(long, default_value = "10000")]
    pub renewal_interval: u64,

    /// Level at which routine election progress is logged.
    #[clap(long, default_value = "log", value_parser = parse_log_at_level)]
    pub log_at_level: LogAtLevel,

    /// Whether startup blocks until the first acquisition sequence finishes.
    // clap 4 requires `num_args = 0..=1`, or it complains about missing arg error
    // https://github.com/clap-rs/clap/discussions/4374
    #[clap(long,
           default_value_t = false,
           action = clap::ArgAction::Set,
           num_args = 0..=1,
           default_missing_value = "true"
    )]
    pub await_leadership: bool,
}

impl Default for Config {
    fn default() -> Self {
        <Self as Parser>::parse_from(Vec::<&'static str>::new())
    }
}

impl Config {
    /// The validity window of the lease, in whole seconds, as written into
    /// the lease record. Always `2 x renewal_interval`.
    pub fn lease_duration(&self) -> i32 {
        (2 * self.renewal_interval / 1000) as i32
    }

    /// Delay before the next renewal write while leading.
    pub(crate) fn renewal_delay(&self) -> Duration {
        Duration::from_millis(self.renewal_interval)
    }

    /// Spacing between bootstrap acquisition attempts: half the lease
    /// duration.
    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.lease_duration() as u64 * 500)
    }

    /// Build a `Config` instance from a series of command line arguments.
    ///
    /// The first element in `args` must be the application name.
    ///
    /// # Examples
    ///
    /// ```
    /// use elector::Config;
    ///
    /// let config = Config::build(&[
    ///     "myapp",
    ///     "--lease-name", "scheduler-leader",
    ///     "--renewal-interval", "5000",
    /// ])?;
    /// # Ok::<(), elector::ConfigError>(())
    /// ```
    pub fn build(args: &[&str]) -> Result<Config, ConfigError> {
        let config = <Self as Parser>::try_parse_from(args).map_err(|e| ConfigError::ParseError {
            source: AnyError::from(&e),
            args: args.iter().map(|x| x.to_string()).collect(),
        })?;

        config.validate()
    }

    /// Validate the state of this config.
    pub fn validate(self) -> Result<Config, ConfigError> {
        if self.renewal_interval < MIN_RENEWAL_INTERVAL {
            return Err(ConfigError::RenewalIntervalTooSmall {
                renewal_interval: self.renewal_interval,
                min: MIN_RENEWAL_INTERVAL,
            });
        }

        Ok(self)
    }
}
