/// Standing orders baked into every task. The agent only learns about the
/// custom actions through this text, so the protocols here must match what
/// the executor actually accepts.
pub const STANDING_ORDERS: &str = r#"You MUST follow these protocols:
1. Price Check Protocol: to check a product's price, navigate to the product page, use Extract to pull the price text, then pass the extracted text and the budget to CheckPriceDeal to get the deal status.
2. Login Protocol: if a page requires a login or shows a CAPTCHA, use PauseForUser with a short reason and wait for the operator.
3. Download Protocol: choose one of two methods.
   - Method A (standard download): if there is a download button, Click it, and your VERY NEXT action must be WaitForDownload.
   - Method B (direct save): if the browser is displaying the file itself (e.g. an inline PDF), use SaveDisplayedFile with a descriptive filename.
4. Upload Protocol: there is only ONE way to upload. Use the single action ClickAndUpload, giving the index of the upload control (e.g. "File upload", "Choose File") and the absolute file path from your memory. It clicks the control AND selects the file in one atomic step."#;

/// Build the first user message of a task. The goal is substituted
/// literally; nothing in it is interpreted.
pub fn build_task_prompt(user_goal: &str) -> String {
    format!(
        "--- STANDING ORDERS (rules you MUST obey) ---\n{}\n\n--- USER'S CURRENT GOAL ---\n{}\n\nThe browser is on the current page. What is your next step?",
        STANDING_ORDERS, user_goal
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_is_substituted_literally() {
        let goal = "buy {weird} $goal\" with \\ braces";
        let prompt = build_task_prompt(goal);
        assert!(prompt.contains(goal));
        assert!(prompt.contains("STANDING ORDERS"));
    }

    #[test]
    fn standing_orders_name_every_custom_action() {
        for action in [
            "CheckPriceDeal",
            "PauseForUser",
            "WaitForDownload",
            "SaveDisplayedFile",
            "ClickAndUpload",
        ] {
            assert!(STANDING_ORDERS.contains(action), "missing {}", action);
        }
    }
}
