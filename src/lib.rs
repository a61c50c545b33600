pub mod clock;
pub mod config;
pub mod error;
pub mod expression;
pub mod markup;
pub mod properties;
pub mod resolver;
pub mod rules;
pub mod synopsis;

pub use config::Config;
pub use error::{EvalError, ResolveError, RuleError, SynopsisError};
pub use resolver::{is_publisher_id, resolve_publisher, PublisherMatch, Resolution, Resolver};
pub use rules::{default_rules, Rule, RuleSet};
pub use synopsis::options::{SynopsisOptions, SynopsisSettings};
pub use synopsis::scorekeeper::{Scorekeeper, Scores};
pub use synopsis::{PublisherSummary, Synopsis, Weighted};
