//! 订阅等级模型

use serde::{Deserialize, Serialize};

/// 订阅等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Basic,
    Pro,
    Enterprise,
}

impl SubscriptionTier {
    /// 每个窗口的宝石上限
    pub fn max_gems(&self) -> i64 {
        match self {
            SubscriptionTier::Basic => 50,
            SubscriptionTier::Pro => 200,
            SubscriptionTier::Enterprise => 500,
        }
    }

    /// 数据库存储值
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    /// 解析存储值，未知/缺失一律回退到 basic
    pub fn parse_or_basic(value: Option<&str>) -> Self {
        match value {
            Some("pro") => SubscriptionTier::Pro,
            Some("enterprise") => SubscriptionTier::Enterprise,
            _ => SubscriptionTier::Basic,
        }
    }
}

impl Default for SubscriptionTier {
    fn default() -> Self {
        SubscriptionTier::Basic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ceilings() {
        assert_eq!(SubscriptionTier::Basic.max_gems(), 50);
        assert_eq!(SubscriptionTier::Pro.max_gems(), 200);
        assert_eq!(SubscriptionTier::Enterprise.max_gems(), 500);
    }

    #[test]
    fn test_unknown_tier_falls_back_to_basic() {
        assert_eq!(
            SubscriptionTier::parse_or_basic(None),
            SubscriptionTier::Basic
        );
        assert_eq!(
            SubscriptionTier::parse_or_basic(Some("ultra")),
            SubscriptionTier::Basic
        );
        assert_eq!(
            SubscriptionTier::parse_or_basic(Some("pro")),
            SubscriptionTier::Pro
        );
    }
}
