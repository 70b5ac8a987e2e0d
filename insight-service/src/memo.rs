//! Business insight memo.
//!
//! Append-only, in-memory, lost on restart. Insertion order is display order.

use tokio::sync::RwLock;

/// URI under which the rendered memo is served.
pub const MEMO_URI: &str = "memo://business_insights";

const EMPTY_MEMO: &str = "目前尚未发现任何业务洞察。";

#[derive(Default)]
pub struct InsightMemo {
    insights: RwLock<Vec<String>>,
}

impl InsightMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one insight and returns the new count.
    pub async fn append(&self, insight: impl Into<String>) -> usize {
        let mut insights = self.insights.write().await;
        insights.push(insight.into());
        insights.len()
    }

    pub async fn len(&self) -> usize {
        self.insights.read().await.len()
    }

    pub async fn render(&self) -> String {
        let insights = self.insights.read().await;
        tracing::debug!(count = insights.len(), "正在合成业务洞察备忘录");
        render_memo(&insights)
    }
}

/// Renders the memo document for `insights`.
pub fn render_memo(insights: &[String]) -> String {
    if insights.is_empty() {
        return EMPTY_MEMO.to_string();
    }

    let mut memo = String::from("📊 业务洞察备忘录 📊\n\n关键洞察发现：\n\n");
    let bullets: Vec<String> = insights.iter().map(|i| format!("- {}", i)).collect();
    memo.push_str(&bullets.join("\n"));

    if insights.len() > 1 {
        memo.push_str("\n总结：\n");
        memo.push_str(&format!(
            "分析揭示了{}个关键业务洞察，这些洞察为业务战略优化和增长提供了机会。",
            insights.len()
        ));
    }
    memo
}
