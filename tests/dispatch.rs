//! Channel engine tests driven through the dispatcher with an in-memory uplink
//!
//! These cover the voice grant lifecycle end to end without a network:
//! - PTT request / grant / release, including stale and denied grants
//! - Foreign grants and releases announced by other units
//! - Selection, affiliation and capture fan-out
//! - Request expiry and session loss

mod common;

use common::{codeplug, Recorder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use trunk_console::protocol::{AudioFrame, VoiceChannelRelease, VoiceChannelResponse, VoiceTag};
use trunk_console::{
    ConnectionStatus, ConsoleError, ConsoleEvent, Dispatcher, GrantPhase, InboundMessage,
    OutboundMessage, ResponseType, VoiceChannel,
};

fn setup() -> (Dispatcher, Arc<Recorder>) {
    setup_with(Recorder::registered())
}

fn setup_with(recorder: Recorder) -> (Dispatcher, Arc<Recorder>) {
    common::init_tracing();
    let recorder = Arc::new(recorder);
    let dispatcher = Dispatcher::new(Arc::new(codeplug(1)), recorder.clone());
    (dispatcher, recorder)
}

fn grant(status: ResponseType, src_id: u32, dst_id: u32) -> InboundMessage {
    InboundMessage::VoiceChannelResponse(VoiceChannelResponse {
        status,
        src_id,
        dst_id,
        channel: Some(VoiceChannel::from("F1")),
    })
}

fn audio(src_id: u32, dst_id: u32) -> InboundMessage {
    InboundMessage::Audio(AudioFrame {
        data: vec![1, 0, 2, 0],
        voice_channel: VoiceTag {
            src_id,
            dst_id,
            frequency: VoiceChannel::from("F1"),
        },
        site: 1,
    })
}

fn phase(d: &Dispatcher, channel: &str) -> GrantPhase {
    d.channel_view(channel).unwrap().phase
}

/// Selected, keyed and granted on Fire1
fn transmitting() -> (Dispatcher, Arc<Recorder>) {
    let (d, uplink) = setup();
    d.set_selected("Fire1", true).unwrap();
    d.press_ptt("Fire1").unwrap();
    d.handle_message("A", grant(ResponseType::Grant, 100, 200));
    uplink.take();
    (d, uplink)
}

#[test]
fn ptt_grant_and_fan_out() {
    let (d, uplink) = setup();
    d.set_selected("Fire1", true).unwrap();
    uplink.take();

    d.press_ptt("Fire1").unwrap();
    assert_eq!(
        uplink.take(),
        vec![(
            "A".to_string(),
            OutboundMessage::voice_channel_request(100, 200, 1)
        )]
    );
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Requesting);
    assert!(d.channel_view("Fire1").unwrap().voice_channel.is_none());

    d.handle_message("A", grant(ResponseType::Grant, 100, 200));
    let view = d.channel_view("Fire1").unwrap();
    assert_eq!(view.phase, GrantPhase::TransmitGranted);
    assert_eq!(view.voice_channel, Some(VoiceChannel::from("F1")));

    assert_eq!(d.capture_frame(&[7, 7]), 1);
    assert_eq!(
        uplink.take(),
        vec![(
            "A".to_string(),
            OutboundMessage::voice_frame(100, 200, VoiceChannel::from("F1"), vec![7, 7], 1)
        )]
    );
}

#[test]
fn ptt_requires_registration() {
    let (d, uplink) = setup_with(Recorder::with_status(ConnectionStatus::Connected));
    let err = d.press_ptt("Fire1").unwrap_err();
    assert!(matches!(err, ConsoleError::NotRegistered(system) if system == "A"));
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Idle);
    assert!(uplink.take().is_empty());
}

#[test]
fn failed_request_rolls_back_to_idle() {
    let (d, uplink) = setup();
    uplink.cut_link();
    assert!(d.press_ptt("Fire1").is_err());
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Idle);
}

#[test]
fn denied_request_returns_to_idle() {
    let (d, _uplink) = setup();
    d.press_ptt("Fire1").unwrap();
    d.handle_message("A", grant(ResponseType::Deny, 100, 200));
    let view = d.channel_view("Fire1").unwrap();
    assert_eq!(view.phase, GrantPhase::Idle);
    assert!(view.voice_channel.is_none());
}

#[test]
fn foreign_grant_receives_without_release() {
    for keyed in [false, true] {
        let (d, uplink) = setup();
        let mut events = d.subscribe();
        if keyed {
            d.press_ptt("Fire1").unwrap();
        }
        uplink.take();

        d.handle_message("A", grant(ResponseType::Grant, 300, 200));
        let view = d.channel_view("Fire1").unwrap();
        assert_eq!(view.phase, GrantPhase::ReceiveGranted);
        assert_eq!(view.last_source_label().as_deref(), Some("Last SRC: 300"));
        assert!(uplink.take().is_empty(), "foreign grant must not send anything");

        let mut saw_source = false;
        while let Ok(Some(event)) = events.try_recv() {
            if event
                == (ConsoleEvent::LastSourceChanged {
                    channel: "Fire1".to_string(),
                    src_id: 300,
                })
            {
                saw_source = true;
            }
        }
        assert!(saw_source);
    }
}

#[test]
fn release_stops_fan_out_even_when_link_is_down() {
    let (d, uplink) = transmitting();
    uplink.cut_link();

    assert!(matches!(
        d.release_ptt("Fire1"),
        Err(ConsoleError::NotConnected(_))
    ));
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Idle);
    assert_eq!(d.capture_frame(&[0, 0]), 0);
}

#[test]
fn release_sends_held_voice_channel() {
    let (d, uplink) = transmitting();
    d.release_ptt("Fire1").unwrap();
    assert_eq!(
        uplink.take(),
        vec![(
            "A".to_string(),
            OutboundMessage::voice_channel_release(100, 200, Some(VoiceChannel::from("F1")), 1)
        )]
    );
    assert_eq!(d.capture_frame(&[0, 0]), 0);
    assert!(uplink.take().is_empty());
}

#[test]
fn grant_for_unconfigured_talkgroup_changes_nothing() {
    let (d, uplink) = transmitting();
    let mut events = d.subscribe();
    let before = d.channel_views();

    d.handle_message("A", grant(ResponseType::Grant, 300, 999));
    d.handle_message("A", grant(ResponseType::Deny, 100, 999));
    d.handle_message("Unknown", grant(ResponseType::Grant, 300, 200));

    assert_eq!(d.channel_views(), before);
    assert!(uplink.take().is_empty());
    assert!(events.try_recv().unwrap().is_none());
}

#[test]
fn grant_on_other_system_does_not_cross_over() {
    let (d, _uplink) = setup();
    d.handle_message("B", grant(ResponseType::Grant, 300, 200));
    assert_eq!(phase(&d, "Aid1"), GrantPhase::ReceiveGranted);
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Idle);
}

#[test]
fn late_grant_after_release_is_released_again() {
    let (d, uplink) = setup();
    d.press_ptt("Fire1").unwrap();
    d.release_ptt("Fire1").unwrap();
    assert_eq!(
        uplink.take(),
        vec![
            (
                "A".to_string(),
                OutboundMessage::voice_channel_request(100, 200, 1)
            ),
            (
                "A".to_string(),
                OutboundMessage::voice_channel_release(100, 200, None, 1)
            ),
        ]
    );

    d.handle_message("A", grant(ResponseType::Grant, 100, 200));
    assert_eq!(
        uplink.take(),
        vec![(
            "A".to_string(),
            OutboundMessage::voice_channel_release(100, 200, Some(VoiceChannel::from("F1")), 1)
        )]
    );
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Idle);
}

#[test]
fn foreign_release_clears_receive_but_own_echo_does_not() {
    let (d, _uplink) = setup();
    d.handle_message("A", grant(ResponseType::Grant, 300, 200));

    let release = |src_id| {
        InboundMessage::VoiceChannelRelease(VoiceChannelRelease {
            src_id,
            dst_id: 200,
            channel: None,
            site: 1,
        })
    };
    d.handle_message("A", release(100));
    assert_eq!(phase(&d, "Fire1"), GrantPhase::ReceiveGranted);
    d.handle_message("A", release(300));
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Idle);
}

#[test]
fn selection_affiliates_once_when_registered() {
    let (d, uplink) = setup();
    assert!(d.set_selected("Fire1", true).unwrap());
    assert!(!d.set_selected("Fire1", true).unwrap());
    assert_eq!(
        uplink.take(),
        vec![(
            "A".to_string(),
            OutboundMessage::group_affiliation(100, 200, 1)
        )]
    );

    // Deselecting sends nothing
    assert!(d.set_selected("Fire1", false).unwrap());
    assert!(uplink.take().is_empty());
}

#[test]
fn registration_affiliates_already_selected_channels() {
    let (d, uplink) = setup_with(Recorder::with_status(ConnectionStatus::Connected));
    d.set_selected("Fire2", true).unwrap();
    d.set_selected("Aid1", true).unwrap();
    assert!(uplink.take().is_empty());

    uplink.set_status(ConnectionStatus::Registered);
    d.on_registered("A");
    assert_eq!(
        uplink.take(),
        vec![(
            "A".to_string(),
            OutboundMessage::group_affiliation(100, 201, 1)
        )]
    );
}

#[test]
fn deselecting_a_transmitting_channel_stops_its_audio() {
    let (d, uplink) = transmitting();
    d.set_selected("Fire1", false).unwrap();
    d.set_selected("Fire1", true).unwrap();
    uplink.take();

    assert_eq!(phase(&d, "Fire1"), GrantPhase::TransmitGranted);
    assert_eq!(d.capture_frame(&[0, 0]), 0);

    // A fresh grant re-enables capture
    d.handle_message("A", grant(ResponseType::Grant, 100, 200));
    assert_eq!(d.capture_frame(&[0, 0]), 1);
}

#[test]
fn capture_flags_are_per_channel() {
    let (d, uplink) = transmitting();
    d.set_selected("Fire2", true).unwrap();
    d.press_ptt("Fire2").unwrap();
    d.handle_message("A", grant(ResponseType::Deny, 100, 201));
    uplink.take();

    // Fire2's denial must not silence Fire1
    assert_eq!(d.capture_frame(&[0, 0]), 1);
    let sent = uplink.take();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0].1,
        OutboundMessage::Audio(frame) if frame.voice_channel.dst_id == 200
    ));
}

#[test]
fn inbound_audio_plays_for_selected_receiving_channel() {
    let (d, _uplink) = setup();
    d.set_selected("Fire1", true).unwrap();
    d.handle_message("A", grant(ResponseType::Grant, 300, 200));

    d.handle_message("A", audio(300, 200));
    assert_eq!(d.playback().len(), 4);

    // Our own echo is suppressed
    d.handle_message("A", audio(100, 200));
    assert_eq!(d.playback().len(), 4);

    // Wrong talkgroup
    d.handle_message("A", audio(300, 201));
    assert_eq!(d.playback().len(), 4);

    let mut out = [0u8; 16];
    assert_eq!(d.playback().read(&mut out), 4);
    assert_eq!(&out[..4], &[1, 0, 2, 0]);
}

#[test]
fn pending_request_expires() {
    let (d, uplink) = setup();
    d.press_ptt("Fire1").unwrap();
    uplink.take();

    d.expire_requests(Instant::now());
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Requesting);

    d.expire_requests(Instant::now() + Duration::from_secs(6));
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Idle);
    assert!(uplink.take().is_empty());
}

#[test]
fn session_loss_drops_channels_to_idle() {
    let (d, _uplink) = transmitting();
    d.handle_message("B", grant(ResponseType::Grant, 300, 200));

    assert!(d.channel_view("Fire1").unwrap().ptt);

    let mut events = d.subscribe();
    d.on_disconnected("A");
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Idle);
    assert_eq!(phase(&d, "Aid1"), GrantPhase::ReceiveGranted);

    let view = d.channel_view("Fire1").unwrap();
    assert!(!view.ptt);
    assert_eq!(
        events.try_recv().unwrap(),
        Some(ConsoleEvent::ChannelStateChanged {
            channel: "Fire1".to_string(),
            view,
        })
    );
    let fire1 = d
        .selection_entries()
        .into_iter()
        .find(|e| e.channel == "Fire1")
        .unwrap();
    assert!(fire1.is_selected);
    assert!(!fire1.ptt_state);
}

#[test]
fn keyed_channel_takes_grant_after_foreign_call_ends() {
    let (d, uplink) = setup();
    d.set_selected("Fire1", true).unwrap();
    d.press_ptt("Fire1").unwrap();
    d.handle_message("A", grant(ResponseType::Grant, 300, 200));
    d.handle_message(
        "A",
        InboundMessage::VoiceChannelRelease(VoiceChannelRelease {
            src_id: 300,
            dst_id: 200,
            channel: None,
            site: 1,
        }),
    );
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Idle);
    uplink.take();

    d.handle_message("A", grant(ResponseType::Grant, 100, 200));
    assert!(uplink.take().is_empty(), "a held PTT must not release its grant");
    assert_eq!(phase(&d, "Fire1"), GrantPhase::TransmitGranted);
    assert!(d.channel_view("Fire1").unwrap().ptt);
    assert_eq!(d.capture_frame(&[0, 0]), 1);
}

#[test]
fn keyed_channel_takes_grant_after_request_expired() {
    let (d, uplink) = setup();
    d.set_selected("Fire1", true).unwrap();
    d.press_ptt("Fire1").unwrap();
    d.expire_requests(Instant::now() + Duration::from_secs(6));
    assert_eq!(phase(&d, "Fire1"), GrantPhase::Idle);
    uplink.take();

    d.handle_message("A", grant(ResponseType::Grant, 100, 200));
    assert!(uplink.take().is_empty());
    assert_eq!(phase(&d, "Fire1"), GrantPhase::TransmitGranted);
}

#[test]
fn selection_entries_report_ptt_from_channel() {
    let (d, _uplink) = setup();
    d.set_selected("Fire2", true).unwrap();
    d.press_ptt("Fire1").unwrap();

    let entries = d.selection_entries();
    assert_eq!(entries.len(), 3);
    let fire1 = entries.iter().find(|e| e.channel == "Fire1").unwrap();
    assert!(fire1.ptt_state && !fire1.is_selected);
    let fire2 = entries.iter().find(|e| e.channel == "Fire2").unwrap();
    assert!(fire2.is_selected && !fire2.ptt_state);

    d.release_ptt("Fire1").unwrap();
    assert!(d.selection_entries().iter().all(|e| !e.ptt_state));
}

#[test]
fn unknown_channel_is_reported() {
    let (d, _uplink) = setup();
    assert!(matches!(
        d.press_ptt("Police"),
        Err(ConsoleError::UnknownChannel(_))
    ));
    assert!(matches!(
        d.set_selected("Police", true),
        Err(ConsoleError::UnknownChannel(_))
    ));
}
