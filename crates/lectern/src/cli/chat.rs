//! Conversation command handler.

use lectern::{
    ConversationId, ConversationType, Lectern, LecternResult, TurnOutcome, TurnRequest,
};

/// Advance a conversation by one turn and print the reply.
pub async fn chat(
    lectern: &Lectern,
    conversation: &str,
    owner: &str,
    message: &str,
    kind: ConversationType,
    lesson: Option<String>,
    resources: Vec<String>,
) -> LecternResult<()> {
    let request = TurnRequest {
        conversation_id: ConversationId::from(conversation),
        owner_id: owner.to_string(),
        conversation_type: kind,
        content: message.to_string(),
        lesson_id: lesson,
        active_question: None,
        attached_resource_ids: resources,
    };

    match lectern.sessions().advance(request).await? {
        TurnOutcome::Replied {
            reply,
            quick_replies,
            introduction,
            ..
        } => {
            if let Some(introduction) = introduction {
                println!("{}\n", introduction.text);
            }
            println!("{}", reply);
            if !quick_replies.is_empty() {
                println!();
                for (i, suggestion) in quick_replies.iter().enumerate() {
                    println!("  [{}] {}", i + 1, suggestion);
                }
            }
        }
        TurnOutcome::Unanswered { reason, .. } => {
            eprintln!("Your message was saved but no reply was produced: {}", reason.kind);
        }
    }
    Ok(())
}
