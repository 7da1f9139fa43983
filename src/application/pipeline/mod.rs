pub mod buzz_factory;
pub mod executor;
pub mod judge;
pub mod order_manager;
pub mod position_sizer;
pub mod screener;
pub mod vault;

use crate::domain::types::NewsArticle;

/// Compact rendering for the screener prompt: title and source only.
pub fn format_news_for_screener(symbol: &str, articles: &[NewsArticle]) -> String {
    if articles.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = articles
        .iter()
        .take(3)
        .map(|a| format!("- {} ({})", a.title, a.source))
        .collect();
    format!("Noticias recentes de {}:\n{}", symbol, lines.join("\n"))
}

/// Richer rendering for the judge prompt: title, summary and source.
pub fn format_news_for_judge(symbol: &str, articles: &[NewsArticle]) -> String {
    if articles.is_empty() {
        return format!("No recent news found for {}", symbol);
    }
    let blocks: Vec<String> = articles
        .iter()
        .take(5)
        .map(|a| {
            format!(
                "HEADLINE: {}\nSUMMARY: {}\nSOURCE: {}",
                a.title, a.summary, a.source
            )
        })
        .collect();
    blocks.join("\n---\n")
}
