//! End-to-end wire-protocol scenarios, driven over real TLS sockets against a
//! throwaway instance via `cosignd-testkit`.

use cosignd::protocol::transport::ReadLine;
use cosignd_testkit::{TestClientHost, TestServer};
use std::time::Duration;

const DEADLINE: Duration = Duration::from_secs(5);

async fn expect_line(
    transport: &mut cosignd::protocol::transport::LineTransport<
        tokio_rustls::client::TlsStream<tokio::net::TcpStream>,
    >,
) -> String {
    match transport.read_line(DEADLINE).await.unwrap() {
        ReadLine::Line(line) => line,
        ReadLine::Eof => panic!("unexpected eof"),
    }
}

fn cgi_host(name: &str) -> TestClientHost {
    TestClientHost {
        hostname: name.to_string(),
        role: cosignd::config::RoleConfig::Cgi,
        proxy_allowed: false,
        ticket_allowed: false,
        proxies: vec![],
    }
}

fn service_host(name: &str) -> TestClientHost {
    TestClientHost {
        hostname: name.to_string(),
        role: cosignd::config::RoleConfig::Service,
        proxy_allowed: false,
        ticket_allowed: false,
        proxies: vec![],
    }
}

#[tokio::test]
async fn successful_sso_login_then_check() {
    let server = TestServer::start(vec![cgi_host("weblogin1.example.edu")])
        .await
        .unwrap();

    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();
    cgi.write_line("LOGIN cosign=ABCDEF 10.0.0.5 alice UMICH.EDU")
        .await
        .unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("200"), "unexpected LOGIN reply: {reply}");

    cgi.write_line("CHECK cosign=ABCDEF").await.unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("232 10.0.0.5 alice UMICH.EDU"), "{reply}");
}

#[tokio::test]
async fn login_rejects_unknown_peer_before_any_command() {
    let server = TestServer::start(vec![cgi_host("weblogin1.example.edu")])
        .await
        .unwrap();

    // Dialing as a CN the server never heard of must fail the handshake's
    // follow-on authentication step, not silently grant access.
    let result = server.dial("some-other-host.example.edu").await;
    assert!(result.is_ok(), "TLS handshake itself still succeeds");
    let mut conn = result.unwrap();
    // The server drops the connection once CN lookup fails, surfacing as
    // EOF or a connection-reset on the very first read.
    let outcome = conn.read_line(DEADLINE).await;
    match outcome {
        Ok(ReadLine::Eof) => {}
        Err(_) => {}
        Ok(ReadLine::Line(line)) => panic!("expected rejection, got: {line}"),
    }
}

#[tokio::test]
async fn service_register_then_check_round_trip() {
    let server = TestServer::start(vec![
        cgi_host("weblogin1.example.edu"),
        service_host("svc1.example.edu"),
    ])
    .await
    .unwrap();

    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();
    cgi.write_line("LOGIN cosign=ABCDEF 10.0.0.5 alice UMICH.EDU")
        .await
        .unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("200"));

    cgi.write_line("REGISTER cosign=ABCDEF 10.0.0.5 cosign-weblogin=ZZZZZZ")
        .await
        .unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("220"), "{reply}");

    let mut svc = server.dial("svc1.example.edu").await.unwrap();
    svc.write_line("CHECK cosign-weblogin=ZZZZZZ").await.unwrap();
    let reply = expect_line(&mut svc).await;
    assert!(reply.starts_with("231 10.0.0.5 alice UMICH.EDU"), "{reply}");

    // Registering the same service cookie again is idempotent, not an error.
    cgi.write_line("REGISTER cosign=ABCDEF 10.0.0.5 cosign-weblogin=ZZZZZZ")
        .await
        .unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("226"), "{reply}");
}

#[tokio::test]
async fn logout_then_check_reports_logged_out() {
    let server = TestServer::start(vec![cgi_host("weblogin1.example.edu")])
        .await
        .unwrap();
    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();

    cgi.write_line("LOGIN cosign=ABCDEF 10.0.0.5 alice UMICH.EDU")
        .await
        .unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("200"));

    cgi.write_line("LOGOUT cosign=ABCDEF").await.unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("210"));

    cgi.write_line("CHECK cosign=ABCDEF").await.unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("430"), "{reply}");
}

#[tokio::test]
async fn login_then_login_again_with_mismatched_principal_is_rejected() {
    let server = TestServer::start(vec![cgi_host("weblogin1.example.edu")])
        .await
        .unwrap();
    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();

    cgi.write_line("LOGIN cosign=ABCDEF 10.0.0.5 alice UMICH.EDU")
        .await
        .unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("200"));

    cgi.write_line("LOGIN cosign=ABCDEF 10.0.0.5 bob UMICH.EDU")
        .await
        .unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("402"), "{reply}");

    // Re-logging the same principal under the same cookie is a no-op success.
    cgi.write_line("LOGIN cosign=ABCDEF 10.0.0.5 alice UMICH.EDU")
        .await
        .unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("201"), "{reply}");
}

#[tokio::test]
async fn check_on_unknown_cookie_is_not_found() {
    let server = TestServer::start(vec![cgi_host("weblogin1.example.edu")])
        .await
        .unwrap();
    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();

    cgi.write_line("CHECK cosign=NEVERSEEN").await.unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("534"), "{reply}");
}

#[tokio::test]
async fn service_role_cannot_login() {
    let server = TestServer::start(vec![service_host("svc1.example.edu")])
        .await
        .unwrap();
    let mut svc = server.dial("svc1.example.edu").await.unwrap();

    svc.write_line("LOGIN cosign=ABCDEF 10.0.0.5 alice UMICH.EDU")
        .await
        .unwrap();
    let reply = expect_line(&mut svc).await;
    assert!(reply.starts_with("500"), "{reply}");
}

#[tokio::test]
async fn retr_unknown_kind_is_rejected() {
    let server = TestServer::start(vec![
        cgi_host("weblogin1.example.edu"),
        service_host("svc1.example.edu"),
    ])
    .await
    .unwrap();

    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();
    cgi.write_line("LOGIN cosign=ABCDEF 10.0.0.5 alice UMICH.EDU")
        .await
        .unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("200"));
    cgi.write_line("REGISTER cosign=ABCDEF 10.0.0.5 cosign-weblogin=ZZZZZZ")
        .await
        .unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("220"));

    let mut svc = server.dial("svc1.example.edu").await.unwrap();
    svc.write_line("RETR cosign-weblogin=ZZZZZZ bogus")
        .await
        .unwrap();
    let reply = expect_line(&mut svc).await;
    assert!(reply.starts_with("441"), "{reply}");
}

#[tokio::test]
async fn logout_rejects_cookie_name_with_slash() {
    let server = TestServer::start(vec![cgi_host("weblogin1.example.edu")])
        .await
        .unwrap();
    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();

    cgi.write_line("LOGOUT has/slash 10.0.0.5").await.unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("511"), "{reply}");
}

#[tokio::test]
async fn register_rejects_login_cookie_with_slash() {
    let server = TestServer::start(vec![cgi_host("weblogin1.example.edu")])
        .await
        .unwrap();
    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();

    cgi.write_line("REGISTER has/slash 10.0.0.5 cosign-weblogin=ZZZZZZ")
        .await
        .unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("521"), "{reply}");
}

#[tokio::test]
async fn register_on_unknown_login_cookie_is_not_found() {
    let server = TestServer::start(vec![cgi_host("weblogin1.example.edu")])
        .await
        .unwrap();
    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();

    cgi.write_line("REGISTER cosign=NEVERSEEN 10.0.0.5 cosign-weblogin=ZZZZZZ")
        .await
        .unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("523"), "{reply}");
}

#[tokio::test]
async fn register_after_logout_is_distinct_from_not_found() {
    let server = TestServer::start(vec![cgi_host("weblogin1.example.edu")])
        .await
        .unwrap();
    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();

    cgi.write_line("LOGIN cosign=ABCDEF 10.0.0.5 alice UMICH.EDU")
        .await
        .unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("200"));

    cgi.write_line("LOGOUT cosign=ABCDEF").await.unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("210"));

    cgi.write_line("REGISTER cosign=ABCDEF 10.0.0.5 cosign-weblogin=ZZZZZZ")
        .await
        .unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("420"), "{reply}");
}

#[tokio::test]
async fn retr_tgt_without_ticket_capability_is_refused() {
    let server = TestServer::start(vec![
        cgi_host("weblogin1.example.edu"),
        service_host("svc1.example.edu"),
    ])
    .await
    .unwrap();

    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();
    cgi.write_line("LOGIN cosign=ABCDEF 10.0.0.5 alice UMICH.EDU")
        .await
        .unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("200"));
    cgi.write_line("REGISTER cosign=ABCDEF 10.0.0.5 cosign-weblogin=ZZZZZZ")
        .await
        .unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("220"));

    let mut svc = server.dial("svc1.example.edu").await.unwrap();
    svc.write_line("RETR cosign-weblogin=ZZZZZZ tgt")
        .await
        .unwrap();
    let reply = expect_line(&mut svc).await;
    assert!(reply.starts_with("441"), "{reply}");
}

#[tokio::test]
async fn noop_and_quit_work_before_and_after_authentication() {
    let server = TestServer::start(vec![cgi_host("weblogin1.example.edu")])
        .await
        .unwrap();
    let mut cgi = server.dial("weblogin1.example.edu").await.unwrap();

    cgi.write_line("NOOP").await.unwrap();
    assert!(expect_line(&mut cgi).await.starts_with("250"));

    cgi.write_line("QUIT").await.unwrap();
    let reply = expect_line(&mut cgi).await;
    assert!(reply.starts_with("221"), "{reply}");
}
