use tether::{ConnectionManager, Endpoint, ManagerConfig, Manifest, Message, Status};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let endpoint: Endpoint = std::env::var("DASHBOARD_ENDPOINT")
        .unwrap_or_else(|_| "ws://127.0.0.1:8891".to_string())
        .parse()
        .map_err(|err| {
            println!("Invalid DASHBOARD_ENDPOINT: {err}");
            std::process::exit(1);
        })
        .unwrap();

    let manager = ConnectionManager::new(ManagerConfig {
        endpoint: Some(endpoint),
        client_id: Some("demo-dashboard".to_string()),
        manifest: Manifest {
            name: "demo-dashboard".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        ..ManagerConfig::default()
    });

    manager.add_listener(|message: &Message| {
        println!("<- {}/{}", message.app, message.kind);
    });

    manager.add_status_listener(|status: Status| {
        println!("status: {status}");
    });

    manager.connect();

    // greet the server every time the connection comes (back) up
    let mut watcher = manager.status_watcher();
    while watcher.changed().await.is_ok() {
        if *watcher.borrow() == Status::Connected {
            let mut hello = Message::new("dashboard", "hello");
            hello.payload = Some(serde_json::json!({ "screen": "home" }));
            manager.send(hello);
        }
    }
}
