//! ASCII backend against a scripted TCP peer

use mcpipe::behavior::{BehaviorValue, Behaviors};
use mcpipe::{AppKey, Client, ErrorKind, Value};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

/// Accept one connection and answer each expected request with its reply
fn scripted_peer(script: Vec<(&'static str, &'static str)>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        for (request, reply) in script {
            let mut buf = vec![0; request.len()];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(String::from_utf8_lossy(&buf), request);
            stream.write_all(reply.as_bytes()).unwrap();
        }
    });
    (address, handle)
}

#[test]
fn store_fetch_and_counters() {
    let (address, peer) = scripted_peer(vec![
        ("set foo 16 0 3\r\nbar\r\n", "STORED\r\n"),
        ("get foo\r\n", "VALUE foo 16 3\r\nbar\r\nEND\r\n"),
        ("get nope\r\n", "END\r\n"),
        ("add foo 2 0 1\r\n1\r\n", "NOT_STORED\r\n"),
        ("incr n 5\r\n", "15\r\n"),
        ("delete foo\r\n", "NOT_FOUND\r\n"),
        ("touch foo 30\r\n", "TOUCHED\r\n"),
    ]);
    let mut client = Client::connect(&[address]).unwrap();

    assert!(client.set("foo", "bar").unwrap());
    assert_eq!(client.get("foo").unwrap(), Some(Value::from("bar")));
    assert_eq!(client.get("nope").unwrap(), None);
    assert!(!client.add("foo", 1).unwrap());
    assert_eq!(client.incr("n", 5).unwrap(), 15);
    assert!(!client.delete("foo").unwrap());
    assert!(client.touch("foo", 30).unwrap());

    drop(client);
    peer.join().unwrap();
}

#[test]
fn utf8_text_keys_travel_as_is() {
    let (address, peer) = scripted_peer(vec![
        ("set café 16 0 1\r\nx\r\n", "STORED\r\n"),
        ("get café\r\n", "VALUE café 16 1\r\nx\r\nEND\r\n"),
    ]);
    let mut client = Client::connect(&[address]).unwrap();

    assert!(client.set("café", "x").unwrap());
    assert_eq!(client.get("café").unwrap(), Some(Value::from("x")));

    drop(client);
    peer.join().unwrap();
}

#[test]
fn multi_get_in_one_request() {
    let (address, peer) = scripted_peer(vec![(
        "get p:a p:b p:c\r\n",
        "VALUE p:a 2 1\r\n1\r\nVALUE p:c 16 2\r\nhi\r\nEND\r\n",
    )]);
    let mut client = Client::connect(&[address]).unwrap();

    let found = client
        .get_multi(["a", "b", "c"], Some(&b"p:"[..]))
        .unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[&AppKey::from("a")], Value::Int(1));
    assert_eq!(found[&AppKey::from("c")], Value::from("hi"));

    drop(client);
    peer.join().unwrap();
}

#[test]
fn gets_and_stale_cas() {
    let (address, peer) = scripted_peer(vec![
        ("gets k\r\n", "VALUE k 16 1 42\r\nv\r\nEND\r\n"),
        ("cas k 16 0 2 42\r\nv2\r\n", "EXISTS\r\n"),
    ]);
    let mut client = Client::connect(&[address]).unwrap();
    let mut behaviors = Behaviors::new();
    behaviors.insert("cas".to_string(), BehaviorValue::Bool(true));
    client.set_behaviors(&behaviors).unwrap();

    let (value, token) = client.gets("k").unwrap().unwrap();
    assert_eq!(value, Value::from("v"));
    assert_eq!(token, 42);
    assert!(!client.cas("k", "v2", token, 0).unwrap());

    drop(client);
    peer.join().unwrap();
}

#[test]
fn server_errors_raise_with_detail() {
    let (address, peer) = scripted_peer(vec![(
        "set big 16 0 3\r\nabc\r\n",
        "SERVER_ERROR object too large for cache\r\n",
    )]);
    let mut client = Client::connect(&[address]).unwrap();

    let err = client.set("big", "abc").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::TooBig));
    let message = err.to_string();
    assert!(message.contains("from set(big)"), "{message}");
    assert!(message.contains("object too large"), "{message}");

    drop(client);
    peer.join().unwrap();
}

#[test]
fn bad_keys_never_reach_the_wire() {
    // No connection is ever accepted
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let mut client = Client::connect(&[address]).unwrap();

    assert!(!client.set("has space", 1).unwrap());
    assert!(!client.delete("bad\nkey").unwrap());
    assert!(client.get_multi(["has space"], None).unwrap().is_empty());
}

#[test]
fn refused_connection_is_a_connection_error() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let mut client = Client::connect(&[address]).unwrap();

    let err = client.get("k").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Connection));
}

#[test]
fn udp_servers_are_rejected() {
    let err = Client::connect(&["udp:127.0.0.1:11211"]).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NotSupported));
}
