use deck_proto::lyrics::LyricTranscript;

const SONG: &str = "\
[ti:Example]
[ar:Someone]
[00:00.00]
[00:12.40]Morning comes in slow
[00:17.95]Coffee on the stove
garbage without a stamp
[00:23.10][01:23.10]Hold on, hold on
[00:29.00]Back to the road
";

#[test]
fn real_world_lrc_keeps_only_stamped_lines() {
    let t = LyricTranscript::from_synced_text(SONG);
    assert!(t.is_synced());
    let lines = t.lines();
    assert_eq!(lines.len(), 6);
    assert!(lines.iter().all(|l| l.time_seconds.is_some()));
    assert!(lines.iter().all(|l| l.text != "garbage without a stamp"));
    assert_eq!(lines.last().unwrap().text, "Hold on, hold on");
}

#[test]
fn times_are_non_decreasing() {
    let t = LyricTranscript::from_synced_text(SONG);
    let times: Vec<f64> = t.lines().iter().filter_map(|l| l.time_seconds).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn exactly_one_active_line_after_first_stamp() {
    let t = LyricTranscript::from_synced_text(SONG);
    assert_eq!(t.active_line(0.0), Some(0));
    assert_eq!(t.active_line(12.39), Some(0));
    assert_eq!(t.active_line(12.5), Some(1));
    assert_eq!(t.active_line(60.0), Some(4));
    assert_eq!(t.active_line(500.0), Some(5));
}

#[test]
fn plain_transcript_never_syncs() {
    let t = LyricTranscript::from_plain_text("la la la\nna na na\n");
    assert!(!t.is_synced());
    assert_eq!(t.lines().len(), 2);
    assert_eq!(t.active_line(1.0), None);
}
