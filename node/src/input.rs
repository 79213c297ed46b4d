use hab_node_common::{InputEvent, InputKind};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::presence::PresenceController;

// Blank lines yield nothing.
pub fn parse_input(line: &str) -> Option<Result<InputEvent, String>> {
    let word = line.trim();
    if word.is_empty() {
        return None;
    }

    let event = match word.to_ascii_lowercase().as_str() {
        "click" => InputEvent::click(),
        "drag" => InputEvent::drag(),
        "press" => InputEvent::new(InputKind::Press),
        "release" => InputEvent::new(InputKind::Release),
        "move" => InputEvent::new(InputKind::Move),
        "key" => InputEvent::new(InputKind::Key),
        "scroll" => InputEvent::new(InputKind::Scroll),
        _ => return Some(Err(word.to_string())),
    };
    Some(Ok(event))
}

pub async fn run_input_source<R>(reader: R, controller: PresenceController) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Some(Ok(event)) => {
                let consumed = controller.handle_input(event).await;
                debug!("{:?} consumed={consumed}", event.kind);
            }
            Some(Err(word)) => warn!("ignoring unknown input `{word}`"),
            None => {}
        }
    }
    info!("input source closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use hab_node_common::{IdleState, ItemNames, PresenceConfig, PresenceEngine};
    use pretty_assertions::assert_eq;
    use tokio::runtime::Handle;

    use super::*;
    use crate::{
        display::LogDisplay,
        gpio::{sim::LoggingDimmer, PinRegistry},
        presence::PresenceOracle,
        scheduler::Scheduler,
    };

    #[test]
    fn words_map_to_events() {
        assert_eq!(parse_input("click\n"), Some(Ok(InputEvent::click())));
        assert_eq!(parse_input(" DRAG "), Some(Ok(InputEvent::drag())));
        assert_eq!(
            parse_input("scroll"),
            Some(Ok(InputEvent::new(InputKind::Scroll)))
        );
        assert_eq!(parse_input("   "), None);
        assert_eq!(parse_input("wave"), Some(Err("wave".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn click_lines_wake_an_idle_controller() {
        let config = PresenceConfig::default();
        let controller = PresenceController::new(
            PresenceEngine::new(config.clone()),
            Box::new(LoggingDimmer::new(PinRegistry::default().claim(18).unwrap())),
            Scheduler::from_handle(Handle::current()),
            Arc::new(LogDisplay::new()),
            PresenceOracle::new(None, &config, &ItemNames::default()),
        );
        controller.start().await;
        tokio::time::sleep(Duration::from_secs(61 + 540)).await;
        assert_eq!(controller.state().await, IdleState::Idle);

        run_input_source(&b"drag\nbogus\n\nclick\n"[..], controller.clone())
            .await
            .unwrap();

        assert_eq!(controller.state().await, IdleState::Present);
    }
}
