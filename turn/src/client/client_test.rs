use std::str::FromStr;

use tokio::net::UdpSocket;

use super::*;

async fn create_listening_test_client(rto_in_ms: u16) -> Result<Client> {
    let conn = UdpSocket::bind("0.0.0.0:0").await?;

    let c = Client::new(ClientConfig {
        stun_serv_addr: String::new(),
        turn_serv_addr: String::new(),
        username: String::new(),
        password: String::new(),
        realm: String::new(),
        software: "TEST SOFTWARE".to_owned(),
        rto_in_ms,
        conn: Arc::new(conn),
    })
    .await?;

    c.listen().await?;

    Ok(c)
}

#[tokio::test]
async fn test_client_binding_request_to_unreachable_address_times_out() -> Result<()> {
    let c = create_listening_test_client(10).await?;

    let to = SocketAddr::from_str("127.0.0.1:9")?;
    let result = c.send_binding_request_to(&to.to_string()).await;
    assert!(result.is_err(), "expected error, but got ok");

    c.close().await?;

    Ok(())
}

#[tokio::test]
async fn test_client_allocate_without_server_errors() -> Result<()> {
    let c = create_listening_test_client(10).await?;

    // turn_serv_addr is empty: SocketAddr parsing fails before any
    // transaction is started.
    let err = c.allocate().await;
    assert!(err.is_err());

    c.close().await?;

    Ok(())
}
