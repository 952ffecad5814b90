use std::time::Duration;

use alert_dispatcher::{caller, Dispatcher, ErrorInfo, EventMessage, Level, Service};

#[tokio::main]
async fn main() {
    let dispatcher = Dispatcher::builder("https://discord.com/api/webhooks/123/token")
        .with_name("payments-alerts")
        .build();

    let event = EventMessage::new("failed to capture payment")
        .with_level(Level::Error)
        .with_code(502)
        .with_service(
            Service::new("payments")
                .with_environment("production")
                .with_kind("http"),
        )
        .with_caller(caller!())
        .with_error(
            ErrorInfo::new("charge request failed")
                .with_caller(caller!())
                .wrap(ErrorInfo::new("connection reset by peer")),
        )
        .with_context(serde_json::json!({
            "order_id": "ord_8812",
            "amount_cents": 15_990,
        }))
        .with_cooldown(Duration::from_secs(300));

    // Returns immediately; delivery happens in the background.
    dispatcher.send_message(event);

    // Before shutdown, give in-flight notifications a chance to settle.
    if let Err(failures) = dispatcher.wait().await {
        eprintln!("some notifications failed: {failures}");
    }
}
