mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn logout_revokes_every_session_of_the_user() -> Result<()> {
    let server = common::start_server().await?;
    let first = server.signed_in("joggl", &["user"]).await?;

    let login: Value = server.login("joggl", "correct horse").await?.json().await?;
    let second = login["data"]["token"].as_str().unwrap().to_string();
    assert_ne!(first, second);

    let whoami: Value = server
        .client
        .get(server.url("/whoami"))
        .bearer_auth(&second)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(whoami["data"]["sessions"], 2);
    assert_eq!(whoami["data"]["group"], "user");

    let res = server
        .client
        .post(server.url("/auth/logout"))
        .bearer_auth(&first)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    for token in [&first, &second] {
        let res = server
            .client
            .get(server.url("/whoami"))
            .bearer_auth(token)
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

#[tokio::test]
async fn sessions_of_other_users_survive_logout() -> Result<()> {
    let server = common::start_server().await?;
    let alice = server.signed_in("alice", &["user"]).await?;
    let bob = server.signed_in("bob", &["user"]).await?;

    server
        .client
        .post(server.url("/auth/logout"))
        .bearer_auth(&alice)
        .send()
        .await?;

    let res = server
        .client
        .get(server.url("/whoami"))
        .bearer_auth(&bob)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn concurrent_logins_share_the_worker_pool() -> Result<()> {
    let server = common::start_server().await?;
    server.register("joggl", "s3cret", &["user"]).await?;

    let logins = (0..6).map(|_| server.login("joggl", "s3cret"));
    for res in futures::future::join_all(logins).await {
        assert_eq!(res?.status(), StatusCode::OK);
    }

    let status = server.gate.password_hasher().status();
    assert!(status.total <= 2);
    assert_eq!(status.busy, 0);

    server.gate.shutdown().await;
    let res = server.client.get(server.url("/health")).send().await?;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}
