use hass_client::{ClientConfig, HassClient};
use serde_json::json;
use std::env::var;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let token =
        var("HASS_TOKEN").expect("please set up the HASS_TOKEN env variable before running this");
    let host = var("HASS_HOST").unwrap_or_else(|_| "localhost".to_owned());

    println!("Creating the Websocket Client and Authenticating the session");
    let client = HassClient::new(ClientConfig::new(host, 8123, token));
    client.connect().await?;

    println!("Getting the Config");
    let cmd = client.get_config().await?;
    println!("config: {:?}\n", cmd);

    println!("Turn the light on");
    client
        .call_service(
            "light".to_owned(),
            "turn_on".to_owned(),
            Some(json!({"entity_id": "light.kitchen"})),
        )
        .await?;

    println!("Getting the states");
    for entity in client.get_states().await? {
        println!("{} = {}", entity.entity_id, entity.state);
    }

    client.close();
    Ok(())
}
