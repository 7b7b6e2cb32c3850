use chrono::NaiveDate;

/// System prompt fixed at startup for every conversation.
pub fn build_system_prompt(today: NaiveDate) -> String {
    format!(
        "You are a personal assistant who helps manage tasks using various skills.\n\
         You never give IDs to the user since those are just for you to keep track of.\n\
         When a user asks to perform an action and you don't have enough information, clarify with the user.\n\
         The current date is: {}",
        today.format("%Y-%m-%d")
    )
}
