//! Fuzz target for protocol v2 request and response parsing.
//!
//! Feeds arbitrary bodies to the upload-pack endpoint of an empty repository
//! and to the client's fetch response parser.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pressgit_git::{
    parse_fetch_response, parse_message, BufferingResponseWriter, GitRequest, GitServer,
};
use pressgit_storage::Repository;

fuzz_target!(|data: &[u8]| {
    let _ = parse_message(data);
    let _ = parse_fetch_response(data, |_| {});

    let Ok(repo) = Repository::in_memory() else {
        return;
    };
    let server = GitServer::new(repo);
    let request = GitRequest::new("/repo.git/git-upload-pack").with_body(data.to_vec());
    let mut response = BufferingResponseWriter::new();
    let _ = server.handle_request(&request, &mut response);
});
