use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionType::Call => write!(f, "Call"),
            OptionType::Put => write!(f, "Put"),
        }
    }
}

/// End-of-day market for one side (call or put) of a strike
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteSide {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub volume: Option<u64>,
}

impl QuoteSide {
    /// Mid price of a two-sided, uncrossed market with positive quotes
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 && ask >= bid => {
                Some((bid + ask) / 2.0)
            }
            _ => None,
        }
    }

    /// (ask - bid) / mid
    pub fn relative_spread(&self) -> Option<f64> {
        let mid = self.mid()?;
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((ask - bid) / mid),
            _ => None,
        }
    }

    /// Last traded price, when positive
    pub fn last_price(&self) -> Option<f64> {
        self.last.filter(|p| p.is_finite() && *p > 0.0)
    }
}

/// Call and put markets at one strike of a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeQuote {
    pub strike: f64,
    pub call: Option<QuoteSide>,
    pub put: Option<QuoteSide>,
}

impl StrikeQuote {
    pub fn side(&self, option_type: OptionType) -> Option<&QuoteSide> {
        match option_type {
            OptionType::Call => self.call.as_ref(),
            OptionType::Put => self.put.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side(bid: f64, ask: f64) -> QuoteSide {
        QuoteSide {
            bid: Some(bid),
            ask: Some(ask),
            ..Default::default()
        }
    }

    #[test]
    fn mid_requires_valid_market() {
        assert_eq!(side(1.0, 1.2).mid(), Some(1.1));
        assert_eq!(side(0.0, 0.05).mid(), None);
        assert_eq!(side(1.3, 1.2).mid(), None);
        assert_eq!(QuoteSide::default().mid(), None);
    }

    #[test]
    fn relative_spread() {
        let spread = side(0.9, 1.1).relative_spread().unwrap();
        assert!((spread - 0.2).abs() < 1e-12);
    }

    #[test]
    fn last_price_ignores_zero_prints() {
        let mut quote = side(0.0, 0.0);
        assert_eq!(quote.last_price(), None);
        quote.last = Some(0.0);
        assert_eq!(quote.last_price(), None);
        quote.last = Some(2.5);
        assert_eq!(quote.last_price(), Some(2.5));
    }
}
