mod account;
mod alerts;
mod features;
mod market;
mod scan;
mod scheduler;
mod throttle;

pub use account::{AccountState, Position};
pub use alerts::{Alert, AlertCandidate, Confidence};
pub use features::{
    finite_or_absent, EarningsFeatures, FeatureSet, IvMetrics, LiquidityFeatures, OptionsFeatures,
    PriceFeatures, TechnicalsFeatures, VolTrend, VolatilityFeatures,
};
pub use market::{MarketSnapshot, OptionContract, OptionKind, OptionsChain, PriceBar, TickerInfo};
pub use scan::{Scan, ScanStatus, ChainSnapshot};
pub use scheduler::{SchedulerState, SchedulerStateKind};
pub use throttle::{Cooldown, DailyAlertCount};
