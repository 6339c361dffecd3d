//! Line-oriented operator console on stdin.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;

use agentnet_core::types::{AgentId, Amount};
use agentnet_p2p::NetworkFacade;

const HELP: &str = "\
commands:
  ask <text>              ask everyone, paying the default reward
  bounty <amount> <text>  ask everyone, paying <amount> for the first answer
  say <text>              broadcast to everyone
  dm <agent-id> <text>    message one agent
  peers                   list known peer addresses
  roster                  list agents that have announced themselves
  whoami                  show this agent's id and addresses
  quit                    stop the node";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask { text: String, reward: Option<Amount> },
    Say(String),
    Dm { to: AgentId, text: String },
    Peers,
    Roster,
    Whoami,
    Help,
    Quit,
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (s, ""),
    }
}

fn require_text(rest: &str, usage: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(rest.to_string())
    }
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let (word, rest) = split_word(line);
    let command = match word {
        "" => return Ok(None),
        "ask" => Command::Ask {
            text: require_text(rest, "ask <text>")?,
            reward: None,
        },
        "bounty" => {
            let (amount, text) = split_word(rest);
            let reward = amount
                .parse::<Amount>()
                .map_err(|_| "usage: bounty <amount> <text>".to_string())?;
            Command::Ask {
                text: require_text(text, "bounty <amount> <text>")?,
                reward: Some(reward),
            }
        }
        "say" => Command::Say(require_text(rest, "say <text>")?),
        "dm" => {
            let (to, text) = split_word(rest);
            let to = AgentId::parse(to).map_err(|e| format!("bad agent id: {e}"))?;
            Command::Dm {
                to,
                text: require_text(text, "dm <agent-id> <text>")?,
            }
        }
        "peers" => Command::Peers,
        "roster" => Command::Roster,
        "whoami" => Command::Whoami,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command {other:?}; try `help`")),
    };
    Ok(Some(command))
}

/// How the console loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    EndOfInput,
}

/// Read commands from stdin until `quit` or end of input.
pub async fn run(facade: Arc<NetworkFacade>, default_reward: Amount) -> anyhow::Result<ConsoleExit> {
    println!("{HELP}");
    run_lines(&facade, BufReader::new(tokio::io::stdin()), default_reward).await
}

async fn run_lines<R>(facade: &NetworkFacade, input: R, default_reward: Amount) -> anyhow::Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse(&line) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(msg) => {
                println!("{msg}");
                continue;
            }
        };
        if command == Command::Quit {
            return Ok(ConsoleExit::Quit);
        }
        execute(facade, command, default_reward).await;
    }
    Ok(ConsoleExit::EndOfInput)
}

async fn execute(facade: &NetworkFacade, command: Command, default_reward: Amount) {
    let outcome = match command {
        Command::Ask { text, reward } => {
            let reward = reward.unwrap_or(default_reward);
            facade
                .ask(&text, reward)
                .await
                .map(|id| format!("asked {id} (reward {reward})"))
        }
        Command::Say(text) => facade.broadcast(&text).await.map(|id| format!("sent {id}")),
        Command::Dm { to, text } => facade
            .send_direct(&text, &to)
            .await
            .map(|id| format!("sent {id} to {}", to.short())),
        Command::Peers => Ok(list(facade.known_peers())),
        Command::Roster => Ok(list(
            facade
                .roster()
                .into_iter()
                .map(|e| format!("{} {} v{} {:?}", e.agent_id, e.display_name, e.protocol_version, e.addresses))
                .collect(),
        )),
        Command::Whoami => {
            let addresses = facade.listen_addresses().await;
            Ok(format!("{}\n{}", facade.agent_id(), list(addresses)))
        }
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok(String::new()),
    };
    match outcome {
        Ok(text) => println!("{text}"),
        Err(e) => {
            warn!(error = %e, "console command failed");
            println!("error: {e}");
        }
    }
}

fn list(items: Vec<String>) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_questions() {
        assert_eq!(
            parse("ask  what is 2+2? ").unwrap(),
            Some(Command::Ask { text: "what is 2+2?".into(), reward: None })
        );
        assert_eq!(
            parse("bounty 100 capital of France?").unwrap(),
            Some(Command::Ask { text: "capital of France?".into(), reward: Some(100) })
        );
        assert!(parse("bounty lots of money").is_err());
        assert!(parse("bounty 5").is_err());
        assert!(parse("ask").is_err());
    }

    #[test]
    fn parses_direct_messages() {
        let id = AgentId::from_key_bytes(&[5u8; 32]);
        assert_eq!(
            parse(&format!("dm {id} hello there")).unwrap(),
            Some(Command::Dm { to: id, text: "hello there".into() })
        );
        assert!(parse("dm not-an-id hi").is_err());
    }

    fn facade() -> NetworkFacade {
        let hub = agentnet_p2p::MemoryHub::new();
        NetworkFacade::new(
            agentnet_p2p::NetConfig::default(),
            Arc::new(agentnet_crypto::KeyPair::generate()),
            Arc::new(hub.transport("console")),
            Arc::new(crate::responder::EchoResponder::new("console")),
            Arc::new(crate::settlement::DryRunTransfer::default()),
        )
    }

    #[tokio::test]
    async fn reports_how_input_ended() {
        let facade = facade();
        let quit = run_lines(&facade, &b"help\nquit\nwhoami\n"[..], 0).await.unwrap();
        assert_eq!(quit, ConsoleExit::Quit);
        let eof = run_lines(&facade, &b"peers\n\nbogus\n"[..], 0).await.unwrap();
        assert_eq!(eof, ConsoleExit::EndOfInput);
    }

    #[test]
    fn simple_words_and_blank_lines() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parse("peers").unwrap(), Some(Command::Peers));
        assert_eq!(parse("exit").unwrap(), Some(Command::Quit));
        assert_eq!(parse("say gm").unwrap(), Some(Command::Say("gm".into())));
        assert!(parse("launch").is_err());
    }
}
