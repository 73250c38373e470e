//! Integration tests for the IMAP client.
//!
//! Everything here goes through the public API only, with scripted
//! streams standing in for a real server.

#![allow(clippy::unwrap_used)]

use tokio_test::io::Builder;

use mailwire_imap::{
    Command, FetchItems, ImapSession, SequenceSet, ServerResponse, UntaggedResponse, utf7,
};

#[test]
fn parser_exists_and_recent() {
    let parsed = ServerResponse::parse(b"* 23 EXISTS\r\n").unwrap();
    match parsed {
        ServerResponse::Untagged(UntaggedResponse::Exists(n)) => assert_eq!(n, 23),
        other => panic!("expected EXISTS, got {other:?}"),
    }

    let parsed = ServerResponse::parse(b"* 2 RECENT\r\n").unwrap();
    assert!(matches!(
        parsed,
        ServerResponse::Untagged(UntaggedResponse::Recent(2))
    ));
}

#[test]
fn parser_list_with_literal_name() {
    let parsed =
        ServerResponse::parse(b"* LIST (\\HasNoChildren) \"/\" {12}\r\nHello{}World\r\n");
    // A name containing brace-like text is still just a name.
    match parsed.unwrap() {
        ServerResponse::Untagged(UntaggedResponse::List(entry)) => {
            assert_eq!(entry.name, "Hello{}World");
            assert_eq!(entry.delimiter, Some('/'));
        }
        other => panic!("expected LIST, got {other:?}"),
    }
}

#[test]
fn parser_fetch_line() {
    let parsed = ServerResponse::parse(b"* 12 FETCH (FLAGS (\\Seen) UID 100)\r\n").unwrap();
    match parsed {
        ServerResponse::Untagged(UntaggedResponse::Fetch { seq, data }) => {
            assert_eq!(seq.0, 12);
            assert_eq!(data.uid.unwrap().0, 100);
        }
        other => panic!("expected FETCH, got {other:?}"),
    }
}

#[test]
fn command_serialization_round() {
    let line = Command::Fetch {
        set: SequenceSet::range(1, 10),
        items: FetchItems::Flags,
        uid: false,
    }
    .serialize("A3");
    assert_eq!(line, "A3 FETCH 1:10 (FLAGS UID)\r\n");
}

#[test]
fn utf7_folder_name_round_trip() {
    let name = "Entw\u{fc}rfe & Notizen";
    let encoded = utf7::encode(name);
    assert_eq!(utf7::decode(&encoded).unwrap(), name);
}

#[tokio::test]
async fn login_select_fetch_logout_flow() {
    let stream = Builder::new()
        .read(b"* OK IMAP4rev1 Service Ready\r\n")
        .write(b"A0 LOGIN \"user\" \"secret\"\r\n")
        .read(b"A0 OK [CAPABILITY IMAP4rev1 IDLE] logged in\r\n")
        .write(b"A1 SELECT INBOX\r\n")
        .read(b"* 1 EXISTS\r\n* 0 RECENT\r\n* OK [UIDVALIDITY 3] ok\r\n* OK [UIDNEXT 5] ok\r\nA1 OK [READ-WRITE] done\r\n")
        .write(b"A2 FETCH 1 (FLAGS UID)\r\n")
        .read(b"* 1 FETCH (UID 4 FLAGS (\\Seen))\r\nA2 OK done\r\n")
        .write(b"A3 LOGOUT\r\n")
        .read(b"* BYE bye\r\nA3 OK done\r\n")
        .build();

    let mut session = ImapSession::new(stream);
    session.greeting().await.unwrap();
    session.login("user", "secret").await.unwrap();
    assert!(session.capabilities().supports_idle());

    let summary = session.select("INBOX").await.unwrap();
    assert_eq!(summary.exists, 1);
    assert_eq!(summary.uid_validity, 3);

    let fetched = session
        .fetch(SequenceSet::single(1), FetchItems::Flags, false, |_| {})
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].1.uid.unwrap().0, 4);

    session.logout().await.unwrap();
}
