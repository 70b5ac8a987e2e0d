//! Prompt templates.

/// Name of the analysis prompt.
pub const CHATINSIGHT_PROMPT: &str = "chatinsight";

const TEMPLATE: &str = r#"
你是一名微信聊天记录数据分析助手。用户希望围绕主题「{topic}」对微信聊天记录进行分析。

可用的能力：
1. 工具 list_tables：列出可分析的数据表（database.table 格式）。
2. 工具 describe_table：查看聊天记录表的建表语句，了解字段含义。
3. 工具 query：执行只读的 SELECT 查询。跨库分析时，可以在一条 SQL 中用 UNION ALL 合并 db1.table 与 db2.table 的结果。
4. 工具 report：执行 SELECT 查询，并基于结果生成结构化的总结报告。
5. 工具 append_insight：把分析过程中发现的业务洞察记录到备忘录中。
6. 资源 memo://business_insights：查看目前累积的业务洞察备忘录。

请按以下步骤进行：
- 先查看表结构，确认时间、发送者、群名称、消息内容等字段；
- 围绕「{topic}」设计若干查询，从消息量、活跃成员、时间分布、高频话题等角度展开；
- 每得到一个有价值的结论，就调用 append_insight 记录下来；
- 最后调用 report 生成总结报告，并结合备忘录给出结论和建议。

注意：只能执行 SELECT 查询，不要尝试修改数据。
"#;

/// Renders the analysis prompt for `topic`.
pub fn render_chatinsight(topic: &str) -> String {
    TEMPLATE.replace("{topic}", topic).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_is_substituted_everywhere() {
        let prompt = render_chatinsight("618 促销");
        assert!(!prompt.contains("{topic}"));
        assert_eq!(prompt.matches("618 促销").count(), 2);
        assert!(prompt.starts_with("你是"));
    }
}
