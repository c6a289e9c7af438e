/// Rule-based demo bot replies
use crate::transport::ChatPayload;

pub const GREETING_REPLY: &str = "Hello! How can I help you today?";
pub const HELP_REPLY: &str = "I'm a simple demo bot. Try saying 'hello' or 'time'.";

/// Reply text for an incoming message. First matching keyword wins, case-insensitive.
pub fn reply_text(input: &str, now_millis: i64) -> String {
    let lowered = input.to_lowercase();
    if lowered.contains("hello") {
        GREETING_REPLY.to_string()
    } else if lowered.contains("time") {
        format!("The current timestamp is {}.", now_millis)
    } else if lowered.contains("help") {
        HELP_REPLY.to_string()
    } else {
        format!("You said: \"{}\"", input)
    }
}

/// Bot reply payload for a user message, in the same conversation
pub fn reply_payload(user_message: &ChatPayload, bot_id: &str, now_millis: i64) -> ChatPayload {
    ChatPayload::bot_message(
        &user_message.conversation_id,
        &reply_text(&user_message.text, now_millis),
        bot_id,
        now_millis,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PayloadKind;

    #[test]
    fn test_reply_rules_in_order() {
        assert_eq!(reply_text("HeLLo there", 1), GREETING_REPLY);
        assert_eq!(reply_text("what time is it", 1234), "The current timestamp is 1234.");
        assert_eq!(reply_text("help me", 1), HELP_REPLY);
        assert_eq!(reply_text("pizza", 1), "You said: \"pizza\"");
    }

    #[test]
    fn test_first_match_wins() {
        // contains both "hello" and "time"
        assert_eq!(reply_text("hello, what time?", 5), GREETING_REPLY);
        // contains both "time" and "help"
        assert_eq!(reply_text("help with time", 5), "The current timestamp is 5.");
    }

    #[test]
    fn test_reply_payload() {
        let user = ChatPayload::user_message("c9", "help", "alice", 10);
        let reply = reply_payload(&user, "BOT", 20);
        assert_eq!(reply.kind, PayloadKind::BotMessage);
        assert_eq!(reply.conversation_id, "c9");
        assert_eq!(reply.sender_id, "BOT");
        assert_eq!(reply.timestamp, 20);
        assert_eq!(reply.text, HELP_REPLY);
    }
}
