use crate::error::{Error, Result};
use crate::executor::PanicStrategy;

/// Smallest fiber stack we accept. Anything below this overflows on the
/// first non-trivial call chain.
pub const MIN_COROUTINE_STACK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub num_threads: Option<usize>,
    pub thread_name_prefix: String,
    /// OS stack size for pool worker threads.
    pub stack_size: Option<usize>,
    /// Stack size for each spawned coroutine.
    pub coroutine_stack_size: usize,
    pub panic_strategy: PanicStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: None,
            thread_name_prefix: "fiber-worker".to_string(),
            stack_size: Some(2 * 1024 * 1024),
            coroutine_stack_size: 256 * 1024,
            panic_strategy: PanicStrategy::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("num_threads too large (max 1024)"));
            }
        }

        if self.coroutine_stack_size < MIN_COROUTINE_STACK_SIZE {
            return Err(Error::config(format!(
                "coroutine_stack_size must be at least {} bytes",
                MIN_COROUTINE_STACK_SIZE
            )));
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn coroutine_stack_size(mut self, size: usize) -> Self {
        self.config.coroutine_stack_size = size;
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_threads() >= 1);
    }

    #[test]
    fn test_builder_rejects_zero_threads() {
        let result = Config::builder().num_threads(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_tiny_coroutine_stack() {
        let result = Config::builder().coroutine_stack_size(1024).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = Config::builder()
            .num_threads(3)
            .thread_name_prefix("io")
            .coroutine_stack_size(64 * 1024)
            .panic_strategy(PanicStrategy::Isolate)
            .build()
            .unwrap();

        assert_eq!(config.worker_threads(), 3);
        assert_eq!(config.thread_name_prefix, "io");
        assert_eq!(config.coroutine_stack_size, 64 * 1024);
        assert_eq!(config.panic_strategy, PanicStrategy::Isolate);
    }
}
