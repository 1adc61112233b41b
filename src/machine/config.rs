use crate::machine::machine_errors::ConfigError;
use crate::machine::registers::DEFAULT_NUM_REGISTERS;
use crate::machine::Engine;
use crate::trace_base::{self, DebugFlag};

/// Size and guard size of one memory zone, both in kilobytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneSize {
    pub size_kib: u64,
    pub redzone_kib: u64,
}

impl ZoneSize {
    pub const fn new(size_kib: u64, redzone_kib: u64) -> Self {
        ZoneSize {
            size_kib,
            redzone_kib,
        }
    }

    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.size_kib.saturating_mul(1024)
    }

    #[inline]
    pub fn redzone_bytes(&self) -> u64 {
        self.redzone_kib.saturating_mul(1024)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub heap: ZoneSize,
    pub solutions_heap: ZoneSize,
    pub global_heap: ZoneSize,
    pub detstack: ZoneSize,
    pub nondetstack: ZoneSize,
    pub trail: ZoneSize,
    /// Whether zones get guard regions. Without them only stores outside a
    /// zone are caught.
    pub check_overflow: bool,
    pub num_registers: usize,
    /// How many dispatched addresses to remember for fatal error reports.
    pub jump_history_len: usize,
    pub use_trail: bool,
    pub debug_flags: Vec<DebugFlag>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            heap: ZoneSize::new(4096, 16),
            solutions_heap: ZoneSize::new(1024, 16),
            global_heap: ZoneSize::new(1024, 16),
            detstack: ZoneSize::new(2048, 16),
            nondetstack: ZoneSize::new(128, 16),
            trail: ZoneSize::new(128, 16),
            check_overflow: true,
            num_registers: DEFAULT_NUM_REGISTERS,
            jump_history_len: 32,
            use_trail: false,
            debug_flags: vec![],
        }
    }
}

fn parse_number(option: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::BadNumber {
        option: option.to_owned(),
        value: value.to_owned(),
    })
}

/// A size in kilobytes that is still representable in bytes.
fn parse_kib(option: &str, value: &str) -> Result<u64, ConfigError> {
    let kib = parse_number(option, value)?;

    match kib.checked_mul(1024) {
        Some(_) => Ok(kib),
        None => Err(ConfigError::BadNumber {
            option: option.to_owned(),
            value: value.to_owned(),
        }),
    }
}

impl EngineConfig {
    pub const ENV_VAR: &'static str = "MERCURY_OPTIONS";

    fn zone_mut(&mut self, zone: &str) -> Option<&mut ZoneSize> {
        match zone {
            "heap" => Some(&mut self.heap),
            "solutions-heap" => Some(&mut self.solutions_heap),
            "global-heap" => Some(&mut self.global_heap),
            "detstack" => Some(&mut self.detstack),
            "nondetstack" => Some(&mut self.nondetstack),
            "trail" => Some(&mut self.trail),
            _ => None,
        }
    }

    /// Parses a whitespace-separated option string on top of the defaults.
    pub fn from_options(options: &str) -> Result<Self, ConfigError> {
        let mut config = EngineConfig::default();
        config.apply_options(options)?;
        Ok(config)
    }

    /// Reads the options from `MERCURY_OPTIONS`; an unset variable means
    /// the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(Self::ENV_VAR) {
            Ok(options) => Self::from_options(&options),
            Err(_) => Ok(EngineConfig::default()),
        }
    }

    pub fn apply_options(&mut self, options: &str) -> Result<(), ConfigError> {
        for option in options.split_whitespace() {
            self.apply_option(option)?;
        }

        Ok(())
    }

    fn apply_option(&mut self, option: &str) -> Result<(), ConfigError> {
        let (name, value) = match option.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (option, None),
        };

        let flag = match name.strip_prefix("--") {
            Some(flag) => flag,
            None => return Err(ConfigError::UnknownOption(option.to_owned())),
        };

        let require_value = || value.ok_or_else(|| ConfigError::MissingValue(name.to_owned()));

        match flag {
            "no-overflow-check" => self.check_overflow = false,
            "overflow-check" => self.check_overflow = true,
            "trail" => self.use_trail = true,
            "no-trail" => self.use_trail = false,
            "num-registers" => {
                self.num_registers = parse_number(name, require_value()?)? as usize;
            }
            "jump-history" => {
                self.jump_history_len = parse_number(name, require_value()?)? as usize;
            }
            "debug-flags" => {
                for flag_name in require_value()?.split(',').filter(|s| !s.is_empty()) {
                    match DebugFlag::from_name(flag_name) {
                        Some(flag) => self.debug_flags.push(flag),
                        None => return Err(ConfigError::UnknownDebugFlag(flag_name.to_owned())),
                    }
                }
            }
            _ => {
                if let Some(zone) = flag.strip_suffix("-redzone-size") {
                    let kib = parse_kib(name, require_value()?)?;

                    match self.zone_mut(zone) {
                        Some(size) => size.redzone_kib = kib,
                        None => return Err(ConfigError::UnknownOption(option.to_owned())),
                    }
                } else if let Some(zone) = flag.strip_suffix("-size") {
                    let kib = parse_kib(name, require_value()?)?;

                    match self.zone_mut(zone) {
                        Some(size) => size.size_kib = kib,
                        None => return Err(ConfigError::UnknownOption(option.to_owned())),
                    }
                } else {
                    return Err(ConfigError::UnknownOption(option.to_owned()));
                }
            }
        }

        Ok(())
    }
}

/// Describes how to create an engine.
///
/// ```
/// # use mercury_engine::*;
/// let engine = EngineBuilder::default()
///     .with_heap_size(64)
///     .with_detstack_size(32)
///     .with_trail(true)
///     .build();
/// # drop(engine);
/// ```
#[derive(Debug, Default, Clone)]
#[must_use]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_heap_size(mut self, kib: u64) -> Self {
        self.config.heap.size_kib = kib;
        self
    }

    pub fn with_solutions_heap_size(mut self, kib: u64) -> Self {
        self.config.solutions_heap.size_kib = kib;
        self
    }

    pub fn with_global_heap_size(mut self, kib: u64) -> Self {
        self.config.global_heap.size_kib = kib;
        self
    }

    pub fn with_detstack_size(mut self, kib: u64) -> Self {
        self.config.detstack.size_kib = kib;
        self
    }

    pub fn with_nondetstack_size(mut self, kib: u64) -> Self {
        self.config.nondetstack.size_kib = kib;
        self
    }

    pub fn with_trail_size(mut self, kib: u64) -> Self {
        self.config.trail.size_kib = kib;
        self
    }

    /// Gives every zone the same guard size.
    pub fn with_redzone_size(mut self, kib: u64) -> Self {
        for zone in [
            &mut self.config.heap,
            &mut self.config.solutions_heap,
            &mut self.config.global_heap,
            &mut self.config.detstack,
            &mut self.config.nondetstack,
            &mut self.config.trail,
        ] {
            zone.redzone_kib = kib;
        }

        self
    }

    pub fn with_check_overflow(mut self, check: bool) -> Self {
        self.config.check_overflow = check;
        self
    }

    pub fn with_num_registers(mut self, n: usize) -> Self {
        self.config.num_registers = n;
        self
    }

    pub fn with_jump_history_len(mut self, n: usize) -> Self {
        self.config.jump_history_len = n;
        self
    }

    pub fn with_trail(mut self, use_trail: bool) -> Self {
        self.config.use_trail = use_trail;
        self
    }

    pub fn with_debug_flag(mut self, flag: DebugFlag) -> Self {
        self.config.debug_flags.push(flag);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates the engine. Debug flags named by the configuration are
    /// switched on process-wide.
    pub fn build(self) -> Engine {
        for flag in &self.config.debug_flags {
            trace_base::set_debug_flag(*flag, true);
        }

        Engine::new(self.config)
    }
}
