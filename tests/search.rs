use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use assert_matches::assert_matches;
use reqwest::Url;

use rnacentral_export::config::SearchConfig;
use rnacentral_export::error::ExportError;
use rnacentral_export::search::{SearchClient, SearchHttpClient};

/// Serves every request with `respond(request line)` and counts the requests.
fn serve<F>(respond: F) -> (Url, Arc<AtomicUsize>)
where
    F: Fn(&str) -> (u16, String) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            counter.fetch_add(1, Ordering::SeqCst);
            let request_line = read_request_line(&mut stream);
            let (status, body) = respond(&request_line);
            let response = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    let url = format!("http://{addr}/ebisearch/ws/rest/rnacentral?query=mirbase&format=json");
    (url.parse().unwrap(), hits)
}

fn read_request_line(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

fn fast_config() -> SearchConfig {
    SearchConfig {
        retry_delay_secs: 0,
        timeout_secs: 5,
        ..SearchConfig::default()
    }
}

#[test]
fn unavailable_service_is_tried_exactly_three_times() {
    let (url, hits) = serve(|_| (503, "{}".to_string()));
    let client = SearchHttpClient::new(&fast_config()).unwrap();

    let err = client.fetch_page(&url, "0").unwrap_err();

    assert_matches!(err, ExportError::FetchFailure { attempts: 3, ref message } if message.contains("503"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[test]
fn transient_failure_recovers_on_retry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let (url, hits) = serve(move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            (500, String::new())
        } else {
            (200, r#"{"hitCount":1,"entries":[{"id":"URS1"}]}"#.to_string())
        }
    });
    let client = SearchHttpClient::new(&fast_config()).unwrap();

    let page = client.fetch_page(&url, "0").unwrap();

    assert_eq!(page.ids, vec!["URS1".to_string()]);
    assert_eq!(page.total_hits, Some(1));
    assert_eq!(page.next_cursor, None);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn cursor_is_sent_as_search_position() {
    let (url, _hits) = serve(|request| {
        if request.contains("searchposition=abc") {
            (
                200,
                r#"{"hitCount":3,"entries":[{"id":"URS3"}],"searchPosition":""}"#.to_string(),
            )
        } else {
            (
                200,
                r#"{"hitCount":3,"entries":[{"id":"URS1"},{"id":"URS2"}],"searchPosition":"abc"}"#
                    .to_string(),
            )
        }
    });
    let client = SearchHttpClient::new(&fast_config()).unwrap();

    let first = client.fetch_page(&url, "0").unwrap();
    assert_eq!(first.ids, vec!["URS1".to_string(), "URS2".to_string()]);
    assert_eq!(first.next_cursor.as_deref(), Some("abc"));

    let second = client.fetch_page(&url, "abc").unwrap();
    assert_eq!(second.ids, vec!["URS3".to_string()]);
    assert!(second.is_last());
}

#[test]
fn unparseable_body_is_malformed_without_retry() {
    let (url, hits) = serve(|_| (200, "<html>maintenance</html>".to_string()));
    let client = SearchHttpClient::new(&fast_config()).unwrap();

    let err = client.fetch_page(&url, "0").unwrap_err();

    assert_matches!(err, ExportError::MalformedResponse(_));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
