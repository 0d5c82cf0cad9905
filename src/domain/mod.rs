//! Core domain types and logic.

pub mod error;
pub mod timeframe;
pub mod ohlcv;
pub mod indicator;
pub mod spectral;
pub mod wavelet;
pub mod cycle;
pub mod regime;
pub mod fld;
pub mod signal;
pub mod alignment;
pub mod classifier;
pub mod analysis;
pub mod scanner;
pub mod position;
pub mod execution;
pub mod risk;
pub mod strategy;
pub mod backtest;
pub mod metrics;
pub mod config_validation;
