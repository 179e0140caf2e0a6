use hass_client::{ClientConfig, HassClient, ReconnectOptions};
use std::env::var;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let token =
        var("HASS_TOKEN").expect("please set up the HASS_TOKEN env variable before running this");
    let host = var("HASS_HOST").unwrap_or_else(|_| "localhost".to_owned());

    println!("Creating the Websocket Client and Authenticating the session");
    let config = ClientConfig::new(host, 8123, token).with_reconnect(ReconnectOptions::default());
    let client = HassClient::new(config);
    client.connect().await?;
    println!("WebSocket connection and authentication works");

    println!("Subscribe to state_changed events");
    let handle = client
        .subscribe_event("state_changed", |event| {
            println!(
                "Event on subscription {} fired at {}: {:?}",
                event.id, event.event.time_fired, event.event.data.entity_id
            );
        })
        .await?;
    println!("Event subscribed: {:?}", handle);

    tokio::time::sleep(Duration::from_secs(20)).await;

    println!("Unsubscribe the Event");
    client.unsubscribe(handle).await?;

    client.close();
    Ok(())
}
