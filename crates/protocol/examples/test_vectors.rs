//! Generate framed test vectors for client interop testing.
//!
//! Run with: cargo run --package cadence-protocol --example test_vectors

use protocol::messages::*;

fn main() {
    // Test vector 1: start from the default template
    let start = Request::new(COMMAND_SESSION, "start");
    print_test_vector("session_start_default", &start.to_frame_bytes());

    // Test vector 2: start a named session from a named template
    let start_named = Request::new(COMMAND_SESSION, "start")
        .with_argument(ARG_SESSION_ID, "writing")
        .with_argument(ARG_SESSION_CONFIG_ID, "pomodoro");
    print_test_vector("session_start_named", &start_named.to_frame_bytes());

    // Test vector 3: pause
    let pause = Request::new(COMMAND_SESSION, "pause").with_argument(ARG_SESSION_ID, "writing");
    print_test_vector("session_pause", &pause.to_frame_bytes());

    // Test vector 4: successful response
    let ok = Response::ok("Session 'writing' paused");
    print_test_vector("response_ok", &ok.to_frame_bytes());

    // Test vector 5: rejected request
    let bad = Response::bad_request("Unknown command type 'sessions'");
    print_test_vector("response_bad_request", &bad.to_frame_bytes());
}

fn print_test_vector(name: &str, bytes: &protocol::Result<Vec<u8>>) {
    let bytes = match bytes {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("{}: {}", name, e);
            return;
        }
    };
    print!("export const {} = new Uint8Array([", name);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            print!(", ");
        }
        print!("{}", b);
    }
    println!("]);");
}
