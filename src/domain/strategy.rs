//! Strategy definition, algorithm configuration and execution audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::error::TradebotError;

pub type StrategyId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    Grid,
    Bollinger,
    Scalping,
    #[serde(rename = "heikenashi")]
    HeikinAshi,
    Volume,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 5] = [
        AlgorithmKind::Grid,
        AlgorithmKind::Bollinger,
        AlgorithmKind::Scalping,
        AlgorithmKind::HeikinAshi,
        AlgorithmKind::Volume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::Grid => "grid",
            AlgorithmKind::Bollinger => "bollinger",
            AlgorithmKind::Scalping => "scalping",
            AlgorithmKind::HeikinAshi => "heikenashi",
            AlgorithmKind::Volume => "volume",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = TradebotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlgorithmKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| TradebotError::validation("algorithm", format!("unknown algorithm '{s}'")))
    }
}

/// Recurrence interval in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Cycle {
    OneMinute,
    FiveMinutes,
    TenMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
}

impl Cycle {
    pub fn minutes(&self) -> u32 {
        match self {
            Cycle::OneMinute => 1,
            Cycle::FiveMinutes => 5,
            Cycle::TenMinutes => 10,
            Cycle::FifteenMinutes => 15,
            Cycle::ThirtyMinutes => 30,
            Cycle::OneHour => 60,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.minutes()) * 60)
    }

    /// Kline interval requested from the broker. Binance has no 10m candle, so
    /// the ten minute cycle reads 15m candles.
    pub fn broker_interval(&self) -> &'static str {
        match self {
            Cycle::OneMinute => "1m",
            Cycle::FiveMinutes => "5m",
            Cycle::TenMinutes | Cycle::FifteenMinutes => "15m",
            Cycle::ThirtyMinutes => "30m",
            Cycle::OneHour => "1h",
        }
    }
}

impl TryFrom<u32> for Cycle {
    type Error = TradebotError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        match minutes {
            1 => Ok(Cycle::OneMinute),
            5 => Ok(Cycle::FiveMinutes),
            10 => Ok(Cycle::TenMinutes),
            15 => Ok(Cycle::FifteenMinutes),
            30 => Ok(Cycle::ThirtyMinutes),
            60 => Ok(Cycle::OneHour),
            0 => Err(TradebotError::validation("cycle", "cycle can't be zero")),
            other => Err(TradebotError::validation(
                "cycle",
                format!("{other} is not one of 1, 5, 10, 15, 30, 60"),
            )),
        }
    }
}

impl From<Cycle> for u32 {
    fn from(cycle: Cycle) -> Self {
        cycle.minutes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Productive,
    Testing,
    Disabled,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Productive => "productive",
            StrategyStatus::Testing => "testing",
            StrategyStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for StrategyStatus {
    type Err = TradebotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "productive" => Ok(StrategyStatus::Productive),
            "testing" => Ok(StrategyStatus::Testing),
            "disabled" => Ok(StrategyStatus::Disabled),
            other => Err(TradebotError::validation(
                "status",
                format!("unknown status '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub grid_levels: u32,
    pub grid_spacing_pct: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Minimum 24h volume; zero disables the filter.
    pub volume_filter: f64,
    /// RSI(14) must be at or below this to buy; zero disables the gate.
    pub rsi_oversold: f64,
    pub min_hold_minutes: u32,
    pub min_move_pct: f64,
    pub leverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BollingerConfig {
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub leverage: f64,
    pub period: usize,
    pub std_dev: f64,
}

impl Default for BollingerConfig {
    fn default() -> Self {
        BollingerConfig {
            take_profit_pct: 0.0,
            stop_loss_pct: 0.0,
            leverage: 0.0,
            period: 20,
            std_dev: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalpingConfig {
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub leverage: f64,
    pub ema_period: usize,
    pub rsi_period: usize,
    /// Skip entries when RSI is above this; zero disables the check.
    pub rsi_max: f64,
    /// Latest volume must reach this multiple of the prior mean; zero disables.
    pub volume_multiplier: f64,
}

impl Default for ScalpingConfig {
    fn default() -> Self {
        ScalpingConfig {
            take_profit_pct: 0.0,
            stop_loss_pct: 0.0,
            leverage: 0.0,
            ema_period: 9,
            rsi_period: 14,
            rsi_max: 0.0,
            volume_multiplier: 0.0,
        }
    }
}

/// Per-algorithm parameters, tagged by algorithm name in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum AlgorithmConfig {
    Grid(GridConfig),
    Bollinger(BollingerConfig),
    Scalping(ScalpingConfig),
    #[serde(rename = "heikenashi")]
    HeikinAshi,
    Volume,
}

impl AlgorithmConfig {
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            AlgorithmConfig::Grid(_) => AlgorithmKind::Grid,
            AlgorithmConfig::Bollinger(_) => AlgorithmKind::Bollinger,
            AlgorithmConfig::Scalping(_) => AlgorithmKind::Scalping,
            AlgorithmConfig::HeikinAshi => AlgorithmKind::HeikinAshi,
            AlgorithmConfig::Volume => AlgorithmKind::Volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: StrategyId,
    pub name: String,
    pub description: String,
    pub algorithm: AlgorithmKind,
    pub monitored_symbols: Vec<String>,
    pub cycle: Cycle,
    pub status: StrategyStatus,
    pub config: AlgorithmConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        monitored_symbols: Vec<String>,
        cycle: Cycle,
        config: AlgorithmConfig,
    ) -> Self {
        let now = Utc::now();
        Strategy {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            algorithm: config.kind(),
            monitored_symbols,
            cycle,
            status: StrategyStatus::Testing,
            config,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.status == StrategyStatus::Disabled
    }

    /// Queue task type; stable for the lifetime of the strategy.
    pub fn task_type(&self) -> String {
        format!("{STRATEGY_TASK_PREFIX}{}", self.id)
    }
}

pub const STRATEGY_TASK_PREFIX: &str = "strategy:execute:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ok,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Ok => "ok",
            ExecutionStatus::Error => "error",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = TradebotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(ExecutionStatus::Ok),
            "error" => Ok(ExecutionStatus::Error),
            other => Err(TradebotError::validation(
                "execution status",
                format!("unknown status '{other}'"),
            )),
        }
    }
}

/// One row per scheduler firing.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyExecution {
    pub strategy_id: StrategyId,
    pub executed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub message: String,
}
