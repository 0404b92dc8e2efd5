//! MCTS configuration parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{ConfigError, Params};

/// MCTS configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MCTSConfig {
    /// PUCT exploration constant (default: 1.1).
    /// Higher values favor exploration over exploitation.
    pub exploration_constant: f64,

    /// Stop after this many traversals (default: 100, `None` = no cap).
    pub max_traverses: Option<u32>,

    /// Never stop before this many traversals, whatever the clock says.
    pub min_traverses: u32,

    /// Stop once this much time has passed.
    pub max_time: Option<Duration>,

    /// Maximum nodes to allocate in the tree.
    /// Prevents memory exhaustion on long searches.
    pub max_nodes: usize,

    /// Temperature for final action selection (0 = most visited).
    pub temperature: f64,

    /// Sample the final action only while the game is younger than this
    /// many plies.
    pub max_rand_depth: usize,

    /// Take edge priors from the evaluator's policy head.
    pub use_policy_network: bool,

    /// Random seed for final action sampling.
    pub seed: u64,
}

impl Default for MCTSConfig {
    fn default() -> Self {
        Self {
            exploration_constant: 1.1,
            max_traverses: Some(100),
            min_traverses: 0,
            max_time: None,
            max_nodes: 100_000,
            temperature: 0.0, // Greedy by default
            max_rand_depth: 0,
            use_policy_network: false,
            seed: 42,
        }
    }
}

impl MCTSConfig {
    /// Create a new config with custom exploration constant.
    #[must_use]
    pub fn with_exploration(mut self, c: f64) -> Self {
        self.exploration_constant = c;
        self
    }

    /// Create a new config with a traversal cap.
    #[must_use]
    pub fn with_max_traverses(mut self, traverses: u32) -> Self {
        self.max_traverses = Some(traverses);
        self
    }

    /// Create a new config with a time budget.
    #[must_use]
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Create a new config with custom seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Create a new config that samples the first `plies` moves of a game
    /// at `temperature`.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64, plies: usize) -> Self {
        self.temperature = temperature;
        self.max_rand_depth = plies;
        self
    }

    /// Create a new config using evaluator priors.
    #[must_use]
    pub fn with_policy_network(mut self) -> Self {
        self.use_policy_network = true;
        self
    }

    /// Pop MCTS options from `params`.
    ///
    /// `max_traverses=0` removes the traversal cap, which then requires
    /// `max_time`. In-search parallelism (`parallel`) is not available for
    /// this variant and is refused.
    pub fn from_params(params: &mut Params) -> Result<Self, ConfigError> {
        if params.pop_flag("parallel")? {
            return Err(ConfigError::Unsupported {
                key: "parallel".into(),
                reason: "MCTS traversals share one tree and run sequentially".into(),
            });
        }
        let defaults = Self::default();
        let max_traverses = match params.pop_parsed::<u32>("max_traverses")? {
            Some(0) => None,
            Some(n) => Some(n),
            None => defaults.max_traverses,
        };
        let config = Self {
            exploration_constant: params.pop_or("c_puct", defaults.exploration_constant)?,
            max_traverses,
            min_traverses: params.pop_or("min_traverses", defaults.min_traverses)?,
            max_time: params.pop_duration("max_time")?,
            max_nodes: params.pop_or("max_nodes", defaults.max_nodes)?,
            temperature: params.pop_or("temperature", defaults.temperature)?,
            max_rand_depth: params.pop_or("max_rand_depth", defaults.max_rand_depth)?,
            use_policy_network: params.pop_flag("use_policy_network")?,
            seed: params.pop_or("seed", defaults.seed)?,
        };
        if config.max_traverses.is_none() && config.max_time.is_none() {
            return Err(ConfigError::InvalidValue {
                key: "max_traverses".into(),
                value: "0".into(),
                reason: "an unbounded search needs max_time".into(),
            });
        }
        if config.temperature < 0.0 || !config.temperature.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "temperature".into(),
                value: config.temperature.to_string(),
                reason: "must be a non-negative number".into(),
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MCTSConfig::default();
        assert!((config.exploration_constant - 1.1).abs() < 1e-9);
        assert_eq!(config.max_traverses, Some(100));
        assert_eq!(config.seed, 42);
        assert_eq!(config.temperature, 0.0);
        assert!(!config.use_policy_network);
    }

    #[test]
    fn test_builder_pattern() {
        let config = MCTSConfig::default()
            .with_exploration(2.0)
            .with_seed(123)
            .with_max_traverses(50)
            .with_temperature(1.0, 8);

        assert_eq!(config.exploration_constant, 2.0);
        assert_eq!(config.seed, 123);
        assert_eq!(config.max_traverses, Some(50));
        assert_eq!(config.max_rand_depth, 8);
    }

    #[test]
    fn test_from_params() {
        let mut params =
            Params::parse("c_puct=2.5,max_traverses=400,max_time=1s,use_policy_network").unwrap();
        let config = MCTSConfig::from_params(&mut params).unwrap();
        params.finish().unwrap();
        assert_eq!(config.exploration_constant, 2.5);
        assert_eq!(config.max_traverses, Some(400));
        assert_eq!(config.max_time, Some(Duration::from_secs(1)));
        assert!(config.use_policy_network);
    }

    #[test]
    fn test_parallel_refused() {
        let mut params = Params::parse("parallel").unwrap();
        let err = MCTSConfig::from_params(&mut params).unwrap_err();
        assert!(matches!(err, ConfigError::Unsupported { ref key, .. } if key == "parallel"));

        let mut off = Params::parse("parallel=false").unwrap();
        assert!(MCTSConfig::from_params(&mut off).is_ok());
    }

    #[test]
    fn test_unbounded_needs_clock() {
        let mut params = Params::parse("max_traverses=0").unwrap();
        assert!(MCTSConfig::from_params(&mut params).is_err());

        let mut timed = Params::parse("max_traverses=0,max_time=200ms").unwrap();
        let config = MCTSConfig::from_params(&mut timed).unwrap();
        assert_eq!(config.max_traverses, None);
    }

    #[test]
    fn test_serialization() {
        let config = MCTSConfig::default().with_max_time(Duration::from_millis(20));
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: MCTSConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }
}
