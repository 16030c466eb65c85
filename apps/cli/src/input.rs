//! Maps terminal lines to client commands.

use client_core::ClientCommand;
use shared::domain::{ConversationId, UserId};

pub const HELP: &str = "\
commands:
  /list                      reload conversations
  /open <conversation-id>    open a conversation
  /close                     close the open conversation
  /new <identifier> <text>   message someone new
  /delete <conversation-id>  delete a conversation
  /call <user-id>            start a call
  /accept                    accept the ringing call
  /reject <user-id>          reject the ringing call
  /hangup                    end the call
  /quit                      exit
anything else is sent to the open conversation";

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Command(ClientCommand),
    Help,
    Empty,
}

pub fn parse_line(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Command(ClientCommand::SendMessage {
            content: line.to_string(),
        }));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    let command = match name {
        "list" => ClientCommand::LoadConversations,
        "open" => ClientCommand::OpenConversation {
            conversation_id: ConversationId::new(required(args, "/open <conversation-id>")?),
        },
        "close" => ClientCommand::CloseConversation,
        "new" => {
            let (identifier, content) = args
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: /new <identifier> <text>".to_string())?;
            ClientCommand::StartConversation {
                identifier: identifier.to_string(),
                content: content.trim().to_string(),
            }
        }
        "delete" => ClientCommand::DeleteConversation {
            conversation_id: ConversationId::new(required(args, "/delete <conversation-id>")?),
        },
        "call" => ClientCommand::StartCall {
            peer_id: UserId::new(required(args, "/call <user-id>")?),
        },
        "accept" => ClientCommand::AcceptCall,
        "reject" => ClientCommand::RejectCall {
            peer_id: UserId::new(required(args, "/reject <user-id>")?),
        },
        "hangup" => ClientCommand::EndCall,
        "quit" | "exit" => ClientCommand::Shutdown,
        "help" => return Ok(Input::Help),
        other => return Err(format!("unknown command /{other}, try /help")),
    };
    Ok(Input::Command(command))
}

fn required<'a>(args: &'a str, usage: &str) -> Result<&'a str, String> {
    if args.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(args)
    }
}
