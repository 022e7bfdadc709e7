//! Durability: state must survive a stop/start cycle through the journal.

mod fixtures;

use fixtures::chat::{Client, RECIPIENT_GROUP, RECIPIENT_USER, SUCCESS, TestServer};

#[test]
fn scenario_survives_restart() {
    let mut server = TestServer::start();

    {
        let mut client = Client::connect(server.addr());
        assert_eq!(client.register("alice").unwrap(), SUCCESS);
        let (id, _) = client.login("alice").unwrap();
        assert_eq!(id, 1);
        let (result, message_id) = client
            .send_message(id, RECIPIENT_USER, "alice", "hi")
            .unwrap();
        assert_eq!(result, SUCCESS);
        assert_eq!(message_id, 2);
        client.goodbye().unwrap();
    }

    server.restart();

    let mut client = Client::connect(server.addr());
    let (id, result) = client.login("alice").unwrap();
    assert_eq!(result, SUCCESS);
    // The allocator resumed strictly past every id handed out before.
    assert!(id > 2);

    let (result, users) = client.get_users(id).unwrap();
    assert_eq!(result, SUCCESS);
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].0, "alice");
    // Session state is not durable: the old login did not come back.
    assert_eq!(users[0].1, "Online");

    let (result, inbox) = client.get_messages(id).unwrap();
    assert_eq!(result, SUCCESS);
    assert_eq!(inbox, vec![(2, "alice".to_string(), "hi".to_string())]);
}

#[test]
fn group_fanout_replays_with_identical_ids() {
    let mut server = TestServer::start();

    {
        let mut client = Client::connect(server.addr());
        for user in ["a", "b", "c"] {
            client.register(user).unwrap();
        }
        client.register_group("team", &["a", "b", "c"]).unwrap();
        let (a, _) = client.login("a").unwrap();
        let (result, first_id) = client
            .send_message(a, RECIPIENT_GROUP, "team", "hey")
            .unwrap();
        assert_eq!(result, SUCCESS);
        assert_eq!(first_id, 2);
        client.goodbye().unwrap();
    }

    server.restart();

    let mut client = Client::connect(server.addr());
    let (b, _) = client.login("b").unwrap();
    let (result, inbox) = client.get_messages(b).unwrap();
    assert_eq!(result, SUCCESS);
    // b's copy is the second allocated row, exactly as before the restart.
    assert_eq!(inbox, vec![(3, "a".to_string(), "hey".to_string())]);

    let (_, groups) = client.get_groups(b).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].0, "team");
}

#[test]
fn deletes_are_durable() {
    let mut server = TestServer::start();

    {
        let mut client = Client::connect(server.addr());
        client.register("alice").unwrap();
        let (id, _) = client.login("alice").unwrap();
        let (_, kept) = client
            .send_message(id, RECIPIENT_USER, "alice", "keep me")
            .unwrap();
        let (_, dropped) = client
            .send_message(id, RECIPIENT_USER, "alice", "drop me")
            .unwrap();
        assert_eq!(client.delete_message(id, dropped).unwrap(), SUCCESS);
        assert_ne!(kept, dropped);
        client.goodbye().unwrap();
    }

    server.restart();

    let mut client = Client::connect(server.addr());
    let (id, _) = client.login("alice").unwrap();
    let (_, inbox) = client.get_messages(id).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].2, "keep me");
}

#[test]
fn quoted_content_survives_restart() {
    let mut server = TestServer::start();

    let content = r#"she said "hi" and left a \ behind"#;
    {
        let mut client = Client::connect(server.addr());
        client.register("alice").unwrap();
        let (id, _) = client.login("alice").unwrap();
        let (result, _) = client
            .send_message(id, RECIPIENT_USER, "alice", content)
            .unwrap();
        assert_eq!(result, SUCCESS);
        client.goodbye().unwrap();
    }

    server.restart();

    let mut client = Client::connect(server.addr());
    let (id, _) = client.login("alice").unwrap();
    let (_, inbox) = client.get_messages(id).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].2, content);
}

#[test]
fn poisoned_journal_serves_from_memory_without_appending() {
    let mut server = TestServer::start();
    std::fs::write(server.journal_path(), "NEW_USER \"early\"\nGARBAGE RECORD\n").unwrap();
    server.restart();

    let mut client = Client::connect(server.addr());
    // The prefix before the bad record was replayed.
    assert_eq!(client.register("early").unwrap(), fixtures::chat::INVALID_REQUEST);

    // New work is accepted in memory but never journaled.
    assert_eq!(client.register("late").unwrap(), SUCCESS);
    let (id, result) = client.login("late").unwrap();
    assert_eq!(result, SUCCESS);
    assert!(id > 0);

    let text = server.journal_text();
    assert!(!text.contains("late"));
    assert!(!text.contains("UPDATE_ID"));
}
