//! Tests for buffering and dispatch in the frame reader

use h2_mux::{flags, frame_type, ErrorCode, FrameReader, Priority, CONNECTION_PREFACE};

use super::{frame, headers_frame, request_block, request_fields, Event, Recorder, END_HEADERS};

#[test]
fn test_reader_fragmented_frames() {
    let data = frame(frame_type::DATA, flags::END_STREAM, 1, b"hello");

    let mut reader = FrameReader::default();
    let mut recorder = Recorder::default();
    reader.read_frames(&data[..4], &mut recorder).unwrap();
    assert!(recorder.events.is_empty());
    assert_eq!(reader.buffered(), 4);

    reader.read_frames(&data[4..12], &mut recorder).unwrap();
    assert!(recorder.events.is_empty());

    reader.read_frames(&data[12..], &mut recorder).unwrap();
    assert_eq!(
        recorder.events,
        vec![Event::Data {
            stream_id: 1,
            data: b"hello".to_vec(),
            padding: 0,
            end_stream: true,
        }]
    );
    assert_eq!(reader.buffered(), 0);
}

#[test]
fn test_connection_preface_handling() {
    let mut data = CONNECTION_PREFACE.to_vec();
    data.extend(frame(frame_type::SETTINGS, 0, 0, &[]));

    let mut reader = FrameReader::default().expect_preface(true);
    let mut recorder = Recorder::default();
    reader.read_frames(&data[..10], &mut recorder).unwrap();
    reader.read_frames(&data[10..], &mut recorder).unwrap();

    assert_eq!(recorder.events.len(), 1);
    assert!(matches!(recorder.events[0], Event::Settings(_)));
}

#[test]
fn test_bad_connection_preface() {
    let mut reader = FrameReader::default().expect_preface(true);
    let err = reader
        .read_frames(b"GET / HTTP/1.1\r\n", &mut Recorder::default())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_padded_data_frame() {
    // pad length 2, "hi", two bytes of padding
    let data = frame(frame_type::DATA, flags::PADDED, 1, &[2, b'h', b'i', 0, 0]);

    let mut reader = FrameReader::default();
    let mut recorder = Recorder::default();
    reader.read_frames(&data, &mut recorder).unwrap();

    assert_eq!(
        recorder.events,
        vec![Event::Data {
            stream_id: 1,
            data: b"hi".to_vec(),
            padding: 3,
            end_stream: false,
        }]
    );
}

#[test]
fn test_empty_data_frame() {
    let data = frame(frame_type::DATA, flags::END_STREAM, 1, &[]);

    let mut reader = FrameReader::default();
    let mut recorder = Recorder::default();
    reader.read_frames(&data, &mut recorder).unwrap();

    assert_eq!(
        recorder.events,
        vec![Event::Data {
            stream_id: 1,
            data: Vec::new(),
            padding: 0,
            end_stream: true,
        }]
    );
}

#[test]
fn test_reader_parse_headers() {
    let data = headers_frame(1, END_HEADERS | flags::END_STREAM, &request_block());

    let mut reader = FrameReader::default();
    let mut recorder = Recorder::default();
    reader.read_frames(&data, &mut recorder).unwrap();

    assert_eq!(
        recorder.events,
        vec![Event::Headers {
            stream_id: 1,
            priority: None,
            fields: request_fields(),
            end_stream: true,
        }]
    );
}

#[test]
fn test_headers_with_priority_and_padding() {
    let mut payload = vec![1]; // pad length
    payload.extend_from_slice(&[0, 0, 0, 0, 16]); // dependency 0, weight 16
    payload.extend(request_block());
    payload.push(0);
    let data = headers_frame(3, END_HEADERS | flags::PRIORITY | flags::PADDED, &payload);

    let mut reader = FrameReader::default();
    let mut recorder = Recorder::default();
    reader.read_frames(&data, &mut recorder).unwrap();

    match &recorder.events[..] {
        [Event::Headers {
            stream_id: 3,
            priority: Some(priority),
            fields,
            ..
        }] => {
            assert_eq!(
                *priority,
                Priority {
                    dependency: 0,
                    exclusive: false,
                    weight: 16,
                }
            );
            assert_eq!(fields, &request_fields());
        }
        other => panic!("Expected Headers event, got {other:?}"),
    }
}

#[test]
fn test_header_blocks_share_decoder_state() {
    let mut encoder = h2_mux::HpackEncoder::default();
    let mut first = Vec::new();
    encoder.encode_request(&mut first, "GET", "https", "example.com", "/");
    let mut second = Vec::new();
    encoder.encode_request(&mut second, "GET", "https", "example.com", "/");
    assert!(second.len() < first.len());

    let mut data = headers_frame(1, END_HEADERS, &first);
    data.extend(headers_frame(3, END_HEADERS, &second));

    let mut reader = FrameReader::default();
    let mut recorder = Recorder::default();
    reader.read_frames(&data, &mut recorder).unwrap();

    assert_eq!(recorder.events.len(), 2);
    for event in &recorder.events {
        match event {
            Event::Headers { fields, .. } => assert_eq!(fields, &request_fields()),
            other => panic!("Expected Headers event, got {other:?}"),
        }
    }
    assert_eq!(reader.decoder().table_len(), 1);
}

#[test]
fn test_multiple_frames_in_single_read() {
    let mut data = frame(frame_type::SETTINGS, 0, 0, &[]);
    data.extend(frame(frame_type::WINDOW_UPDATE, 0, 0, &[0, 0, 0, 1]));
    data.extend(frame(frame_type::PING, 0, 0, &[0; 8]));

    let mut reader = FrameReader::default();
    let mut recorder = Recorder::default();
    reader.read_frames(&data, &mut recorder).unwrap();

    assert_eq!(recorder.events.len(), 3);
    assert_eq!(recorder.events[1], Event::WindowUpdate(0, 1));
}

#[test]
fn test_buffer_keeps_partial_trailing_frame() {
    let mut data = frame(frame_type::PING, 0, 0, &[0; 8]);
    let second = frame(frame_type::DATA, 0, 1, b"abcdef");
    data.extend_from_slice(&second[..11]);

    let mut reader = FrameReader::default();
    let mut recorder = Recorder::default();
    reader.read_frames(&data, &mut recorder).unwrap();
    assert_eq!(recorder.events.len(), 1);
    assert_eq!(reader.buffered(), 11);

    reader.read_frames(&second[11..], &mut recorder).unwrap();
    assert_eq!(recorder.events.len(), 2);
    assert_eq!(reader.buffered(), 0);
}

#[test]
fn test_large_frame_within_configured_limit() {
    let payload = vec![7u8; 40_000];
    let data = frame(frame_type::DATA, 0, 1, &payload);

    let mut reader = FrameReader::default();
    reader.set_max_frame_size(65_536);
    let mut recorder = Recorder::default();
    reader.read_frames(&data, &mut recorder).unwrap();

    match &recorder.events[..] {
        [Event::Data { data, .. }] => assert_eq!(data.len(), 40_000),
        other => panic!("Expected Data event, got {other:?}"),
    }
}
