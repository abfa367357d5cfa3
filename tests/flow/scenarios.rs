//! Window exhaustion and scheduling scenarios

use h2_mux::frame::DEFAULT_INITIAL_WINDOW_SIZE;
use h2_mux::{FlowController, Stream};
use pretty_assertions::assert_eq;

use super::{stream, Call, Fixture, RecordingWriter};

#[test]
fn test_remote_windows_default() {
    let controller = FlowController::new();
    assert_eq!(controller.remote_connection_window(), DEFAULT_INITIAL_WINDOW_SIZE);
    assert_eq!(controller.remote_initial_stream_window(), DEFAULT_INITIAL_WINDOW_SIZE);
}

#[test]
fn test_connection_window_update() {
    let mut controller = FlowController::new();
    controller.remote_connection_window_update(4711).unwrap();
    assert_eq!(controller.remote_connection_window(), DEFAULT_INITIAL_WINDOW_SIZE + 4711);
}

#[test]
fn test_start_applies_initial_stream_window() {
    let mut controller = FlowController::new();
    let mut stream = Stream::new(17, vec![0; 4711]);
    assert_eq!(stream.remote_window, 0);

    controller.start(&mut stream);
    assert_eq!(stream.remote_window, controller.remote_initial_stream_window());
    assert!(controller.is_registered(17));
}

#[test]
fn test_single_stream() {
    let mut fixture = Fixture::new();
    fixture.start(1, 17);
    fixture.verify_flush(&[stream(1).headers().estimate(17).write_end(17)]);
    assert_eq!(fixture.sink.written.len(), 1);
    assert_eq!(fixture.sink.written[0].1.len(), 17);
}

#[test]
fn test_two_concurrent_streams() {
    let mut fixture = Fixture::new();
    fixture.start(1, 7);
    fixture.start(3, 17);
    fixture.verify_flush(&[
        stream(1).headers().estimate(7).write_end(7),
        stream(3).headers().estimate(17).write_end(17),
    ]);
}

#[test]
fn test_sequential_streams() {
    let mut fixture = Fixture::new();
    let mut expected_window = fixture.controller.remote_connection_window();

    for (i, size) in [17, 4711, 32, 45, 158].into_iter().enumerate() {
        let id = 1 + 2 * i as u32;
        fixture.start(id, size);
        fixture.verify_flush(&[stream(id).headers().estimate(size).write_end(size)]);
        expected_window -= size as i32;
        assert_eq!(fixture.controller.remote_connection_window(), expected_window);
    }
}

#[test]
fn test_stream_window_exhaustion_single_stream() {
    let mut fixture = Fixture::new();
    fixture.controller.remote_initial_stream_window_size_update(3);

    // Operation  | Data | Stream Window
    //            | 6    | 3
    // Write:  3  | 3    | 0
    // Update: 2  | 3    | 2
    // Write:  2  | 1    | 0
    // Update: 3  | 1    | 3
    // Write:  1  | 0    | 2
    fixture.start(1, 6);
    fixture.verify_flush(&[stream(1).headers().estimate(3).write(3)]);
    assert_eq!(fixture.remote_window(1), 0);

    fixture.stream_window_update(1, 2);
    fixture.verify_flush(&[stream(1).estimate(2).write(2)]);
    assert_eq!(fixture.remote_window(1), 0);

    fixture.stream_window_update(1, 3);
    fixture.verify_flush(&[stream(1).estimate(1).write_end(1)]);
    assert_eq!(fixture.remote_window(1), 2);
}

#[test]
fn test_one_exhausted_stream_with_two_happy_streams() {
    let mut fixture = Fixture::new();
    fixture.controller.remote_initial_stream_window_size_update(10);

    fixture.start(1, 20);
    fixture.verify_flush(&[stream(1).headers().estimate(10).write(10)]);

    fixture.start(3, 5);
    fixture.start(5, 10);
    fixture.verify_flush(&[
        stream(3).headers().estimate(5).write_end(5),
        stream(5).headers().estimate(10).write_end(10),
    ]);
    assert!(fixture.controller.is_registered(1));
}

#[test]
fn test_two_exhausted_streams_with_one_happy_stream() {
    let mut fixture = Fixture::new();
    fixture.controller.remote_initial_stream_window_size_update(10);

    fixture.start(1, 20);
    fixture.start(3, 5);
    fixture.start(5, 30);
    fixture.verify_flush(&[
        stream(1).headers().estimate(10).write(10),
        stream(3).headers().estimate(5).write_end(5),
        stream(5).headers().estimate(10).write(10),
    ]);
}

#[test]
fn test_stream_and_connection_window_exhaustion() {
    let mut fixture = Fixture::with_controller(FlowController::with_windows(20, 10));

    // Exhaust both stream windows and the connection window
    fixture.start(1, 20);
    fixture.start(3, 20);
    fixture.verify_flush(&[
        stream(1).headers().estimate(10).write(10),
        stream(3).headers().estimate(10).write(10),
    ]);
    assert_eq!(fixture.controller.remote_connection_window(), 0);

    // Enough connection window for the first stream to complete
    fixture.connection_window_update(15);

    // Stream windows are still exhausted
    fixture.verify_flush(&[]);

    fixture.stream_window_update(1, 5);
    fixture.verify_flush(&[stream(1).estimate(5).write(5)]);

    // Stream 1 went to the back of the queue after writing
    fixture.stream_window_update(3, 5);
    fixture.stream_window_update(1, 5);
    fixture.verify_flush(&[
        stream(3).estimate(5).write(5),
        stream(1).estimate(5).write_end(5),
    ]);
    assert_eq!(fixture.controller.remote_connection_window(), 0);
    assert_eq!(fixture.remote_window(3), 0);

    // Connection window is exhausted
    fixture.verify_flush(&[]);

    fixture.connection_window_update(20);

    // Stream window is still exhausted
    fixture.verify_flush(&[]);

    fixture.stream_window_update(3, 10);
    fixture.verify_flush(&[stream(3).estimate(5).write_end(5)]);
    assert_eq!(fixture.controller.registered(), 0);
}

#[test]
fn test_connection_window_exhaustion_single_stream() {
    let mut fixture = Fixture::with_controller(FlowController::with_windows(3, DEFAULT_INITIAL_WINDOW_SIZE));

    fixture.start(1, 6);
    fixture.verify_flush(&[stream(1).headers().estimate(3).write(3)]);
    fixture.connection_window_update(2);
    fixture.verify_flush(&[stream(1).estimate(2).write(2)]);
    fixture.connection_window_update(3);
    fixture.verify_flush(&[stream(1).estimate(1).write_end(1)]);
    assert_eq!(fixture.controller.remote_connection_window(), 2);
}

#[test]
fn test_negative_stream_window_withholds_writes() {
    let mut fixture = Fixture::new();
    fixture.controller.remote_initial_stream_window_size_update(10);
    fixture.start(1, 30);
    fixture.verify_flush(&[stream(1).headers().estimate(10).write(10)]);

    // Peer shrinks the initial window from 10 to 2 after 10 bytes were sent
    fixture
        .controller
        .apply_initial_window_delta(&mut fixture.streams, -8)
        .unwrap();
    assert_eq!(fixture.remote_window(1), -8);
    fixture.verify_flush(&[]);

    fixture.stream_window_update(1, 8);
    fixture.verify_flush(&[]);

    fixture.stream_window_update(1, 4);
    fixture.verify_flush(&[stream(1).estimate(4).write(4)]);
}

#[test]
fn test_window_overflow_is_flow_control_error() {
    let mut controller = FlowController::new();
    let err = controller.remote_connection_window_update(i32::MAX).unwrap_err();
    assert_eq!(err.code(), h2_mux::ErrorCode::FlowControlError);
    assert_eq!(controller.remote_connection_window(), DEFAULT_INITIAL_WINDOW_SIZE);
}

#[test]
fn test_removed_stream_is_not_written() {
    let mut fixture = Fixture::new();
    fixture.start(1, 10);
    fixture.start(3, 10);
    fixture.controller.remove(1);
    fixture.streams.remove_stream(1);

    fixture.verify_flush(&[stream(3).headers().estimate(10).write_end(10)]);
}

#[test]
fn test_failed_headers_only_drop_that_stream() {
    let mut fixture = Fixture::new();
    fixture.start(1, 10);
    fixture.start(3, 10);
    fixture.start(5, 4);
    let connection_before = fixture.controller.remote_connection_window();

    let writer = RecordingWriter {
        oversized: vec![3],
        ..RecordingWriter::default()
    };
    let calls = fixture.flush_with(writer);

    let size_hint = 3 * 64 + 19 + 19 + 13;
    assert_eq!(
        calls,
        vec![
            Call::EstimateHeaders(1),
            Call::EstimateData(1, 10),
            Call::EstimateHeaders(3),
            Call::EstimateData(3, 10),
            Call::EstimateHeaders(5),
            Call::EstimateData(5, 4),
            Call::WriteStart(size_hint),
            Call::Headers(1, false),
            Call::Data(1, 10, true),
            Call::StreamEnd(1),
            Call::Headers(3, false),
            Call::Failed(3),
            Call::Headers(5, false),
            Call::Data(5, 4, true),
            Call::StreamEnd(5),
            Call::WriteEnd(64 + 19 + 64 + 13),
        ]
    );

    // nothing of stream 3 was charged, and it is no longer scheduled
    assert_eq!(fixture.controller.remote_connection_window(), connection_before - 14);
    assert_eq!(fixture.remote_window(3), DEFAULT_INITIAL_WINDOW_SIZE);
    assert!(!fixture.controller.is_registered(3));
    assert_eq!(fixture.controller.registered(), 0);
    assert_eq!(fixture.flush(), Vec::new());
}
