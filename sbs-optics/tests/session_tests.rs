use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use sbs_core::{ChangeKind, JobState};
use sbs_optics::{
    AcceleratorInfo, Error, OpticsMeasurement, SbsInput, Segment, SegmentBySegment, Session,
};

/// Records every input and fails for measurements named in `fail_for`.
#[derive(Default)]
struct RecordingRunner {
    inputs: Mutex<Vec<SbsInput>>,
    fail_for: Vec<String>,
}

impl SegmentBySegment for RecordingRunner {
    fn run(&self, input: &SbsInput) -> sbs_optics::Result<()> {
        self.inputs.lock().unwrap().push(input.clone());
        if self.fail_for.contains(&input.measurement) {
            return Err(Error::Command {
                program: "python3".into(),
                status: "exit status: 1".into(),
                stderr: format!("BPM missing in {}", input.measurement),
            });
        }
        Ok(())
    }
}

fn lhc(name: &str, beam: u8) -> OpticsMeasurement {
    OpticsMeasurement::new(format!("/data/2023-05-01/{name}"))
        .with_model_dir(format!("/models/b{beam}"))
        .with_info(AcceleratorInfo::from_sequence(&format!("lhcb{beam}"), Some("01/05/23")))
}

fn session_with(runner: RecordingRunner) -> (Session, Arc<RecordingRunner>) {
    let runner = Arc::new(runner);
    (Session::new(Arc::clone(&runner) as Arc<dyn SegmentBySegment>), runner)
}

fn record_changes(session: &mut Session) -> Rc<RefCell<Vec<ChangeKind>>> {
    let changes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&changes);
    session.subscribe(move |change| sink.borrow_mut().push(change.kind));
    changes
}

fn segment_names(session: &Session, measurement: &str) -> Vec<String> {
    session
        .measurements()
        .get(measurement)
        .unwrap()
        .segments()
        .keys()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_load_rejects_duplicate_folder_names() {
    let (mut session, _) = session_with(RecordingRunner::default());
    let added = session.load_measurements([lhc("b1_meas", 1), lhc("b2_meas", 2)]);
    assert_eq!(added, ["b1_meas", "b2_meas"]);
    assert_eq!(session.selected(), ["b1_meas", "b2_meas"]);

    let added = session.load_measurements([
        OpticsMeasurement::new("/other/place/b1_meas"),
        lhc("b1_kmod", 1),
    ]);
    assert_eq!(added, ["b1_kmod"]);
    assert_eq!(session.measurements().len(), 3);
    assert_eq!(session.selected(), ["b1_kmod"]);
}

#[test]
fn test_load_notifies_once_per_batch() {
    let (mut session, _) = session_with(RecordingRunner::default());
    let changes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&changes);
    session.subscribe(move |change| sink.borrow_mut().push(change.kind));

    session.load_measurements([lhc("a", 1), lhc("b", 1), lhc("c", 2)]);

    assert_eq!(*changes.borrow(), [ChangeKind::Inserted]);
}

#[test]
fn test_actions_require_selection() {
    let (mut session, _) = session_with(RecordingRunner::default());
    assert!(matches!(session.new_segment(), Err(Error::NoSelection)));
    assert!(matches!(session.add_default_segments(), Err(Error::NoSelection)));
    assert!(matches!(session.run_segments::<&str>(&[]), Err(Error::NoSelection)));
}

#[test]
fn test_select_unknown_keeps_selection() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1), lhc("b", 2)]);
    session.select(["a"]).unwrap();
    assert!(session.select(["a", "zz"]).is_err());
    assert_eq!(session.selected(), ["a"]);
}

#[test]
fn test_new_segment_twice_is_duplicate() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1), lhc("b", 2)]);

    session.new_segment().unwrap();
    assert_eq!(segment_names(&session, "a"), ["New Segment"]);
    assert_eq!(segment_names(&session, "b"), ["New Segment"]);

    assert!(matches!(
        session.new_segment(),
        Err(Error::Core(sbs_core::Error::DuplicateKey { .. }))
    ));
}

#[test]
fn test_segments_are_not_shared_between_measurements() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1), lhc("b", 2)]);
    session.new_segment().unwrap();

    session.rename_segment("a", "New Segment", "IP1").unwrap();

    assert_eq!(segment_names(&session, "a"), ["IP1"]);
    assert_eq!(segment_names(&session, "b"), ["New Segment"]);
}

#[test]
fn test_default_segments_use_each_beam() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1), lhc("b", 2), OpticsMeasurement::new("/data/c")]);

    session.add_default_segments().unwrap();

    let ip1 = |m: &str| {
        session
            .measurements()
            .get(m)
            .unwrap()
            .segments()
            .get("IP1")
            .map(Segment::to_input_string)
    };
    assert_eq!(ip1("a").as_deref(), Some("IP1,BPM.12L1.B1,BPM.12R1.B1"));
    assert_eq!(ip1("b").as_deref(), Some("IP1,BPM.12L1.B2,BPM.12R1.B2"));
    assert_eq!(ip1("c"), None);
}

#[test]
fn test_copy_and_remove_segments() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1)]);
    session.add_default_segments().unwrap();

    session.copy_segments(&["IP5"]).unwrap();
    session
        .set_segment_range("a", "IP5 - Copy", Some("BPM.10L5.B1".into()), Some("BPM.10R5.B1".into()))
        .unwrap();
    let copy = session.measurements().get("a").unwrap().segments().get("IP5 - Copy").cloned();
    assert_eq!(copy.unwrap().to_input_string(), "IP5 - Copy,BPM.10L5.B1,BPM.10R5.B1");

    let err = session.remove_segments(&["IP5", "IP9"]).unwrap_err();
    assert!(matches!(err, Error::Core(sbs_core::Error::NotFound { ref keys }) if keys == &["IP9"]));
    assert_eq!(segment_names(&session, "a").len(), 8);
    assert!(!segment_names(&session, "a").contains(&"IP5".to_string()));
}

#[test]
fn test_run_snapshots_enabled_segments() {
    let (mut session, runner) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1)]);
    session.add_default_segments().unwrap();
    assert!(!session.toggle_segment("a", "IP2").unwrap());

    assert_eq!(session.run_segments::<&str>(&[]).unwrap(), 1);
    // The live segments can change while the job holds its snapshot.
    session.remove_segments(&["IP1"]).unwrap();

    let finished = session.wait_jobs();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].state(), JobState::Completed);
    assert_eq!(session.status_text(), "Ready");

    let inputs = runner.inputs.lock().unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].segments.len(), 7);
    assert_eq!(inputs[0].segments[0], "IP1,BPM.12L1.B1,BPM.12R1.B1");
    assert_eq!(inputs[0].year.as_deref(), Some("2023"));
}

#[test]
fn test_one_failing_job_does_not_affect_others() {
    let (mut session, runner) = session_with(RecordingRunner {
        fail_for: vec!["b".to_string()],
        ..RecordingRunner::default()
    });
    session.load_measurements([lhc("a", 1), lhc("b", 2)]);
    session.new_segment().unwrap();

    assert_eq!(session.run_segments(&["New Segment"]).unwrap(), 2);
    let mut finished = session.wait_jobs();
    finished.sort_by(|x, y| x.name().cmp(y.name()));

    assert_eq!(finished[0].state(), JobState::Completed);
    assert_eq!(finished[1].state(), JobState::Failed);
    assert!(finished[1].failure().unwrap().message.contains("BPM missing in b"));
    assert_eq!(runner.inputs.lock().unwrap().len(), 2);
}

#[test]
fn test_run_skips_incomplete_measurements() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1), OpticsMeasurement::new("/data/bare")]);
    session.add_default_segments().unwrap();

    assert_eq!(session.run_segments::<&str>(&[]).unwrap(), 1);
    assert_eq!(session.wait_jobs().len(), 1);

    session.select(["bare"]).unwrap();
    assert!(matches!(
        session.run_segments::<&str>(&[]),
        Err(Error::IncompleteMeasurement { .. })
    ));
}

#[test]
fn test_remove_measurement_updates_selection() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1), lhc("b", 2)]);
    session.remove_measurements(["a"]).unwrap();
    assert_eq!(session.selected(), ["b"]);
    assert!(session.remove_measurements(["a"]).is_err());
}

#[test]
fn test_add_segments_from_definitions() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1), lhc("b", 2)]);
    let definitions: Vec<Segment> = ["IP1,BPM.12L1.B1,BPM.12R1.B1", "MQXA.1R1"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();

    session.add_segments(&definitions).unwrap();

    assert_eq!(segment_names(&session, "a"), ["IP1", "MQXA.1R1"]);
    assert_eq!(segment_names(&session, "b"), ["IP1", "MQXA.1R1"]);
}

#[test]
fn test_rename_measurement_keeps_selection() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1), lhc("b", 2)]);

    session.rename_measurement("a", "renamed").unwrap();

    assert_eq!(session.selected(), ["renamed", "b"]);
    session.new_segment().unwrap();
    assert_eq!(segment_names(&session, "renamed"), ["New Segment"]);

    assert!(matches!(
        session.rename_measurement("renamed", "b"),
        Err(Error::Core(sbs_core::Error::DuplicateKey { .. }))
    ));
    assert!(matches!(
        session.rename_measurement("renamed", " "),
        Err(Error::EmptyMeasurementName)
    ));
    assert_eq!(session.selected(), ["renamed", "b"]);
}

#[test]
fn test_failed_segment_edits_do_not_notify() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1)]);
    session.add_default_segments().unwrap();
    let changes = record_changes(&mut session);

    assert!(session.rename_segment("a", "X", "Y").is_err());
    assert!(session.rename_segment("a", "IP1", "IP2").is_err());
    assert!(session.toggle_segment("a", "X").is_err());
    assert!(session
        .set_segment_range("a", "X", Some("S".into()), Some("E".into()))
        .is_err());
    assert!(session.new_segment().is_ok());
    assert!(session.new_segment().is_err());

    assert_eq!(*changes.borrow(), [ChangeKind::Updated]);
}

#[test]
fn test_action_over_selection_notifies_once() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1), lhc("b", 2), lhc("c", 1)]);
    let changes = record_changes(&mut session);

    session.new_segment().unwrap();
    session.add_default_segments().unwrap();
    session.rename_segment("b", "IP1", "IP1-left").unwrap();

    assert_eq!(
        *changes.borrow(),
        [ChangeKind::Updated, ChangeKind::Updated, ChangeKind::Updated]
    );
}

#[test]
fn test_blank_segment_fields_are_rejected() {
    let (mut session, _) = session_with(RecordingRunner::default());
    session.load_measurements([lhc("a", 1)]);
    session.new_segment().unwrap();

    assert!(matches!(
        session.rename_segment("a", "New Segment", ""),
        Err(Error::InvalidSegment(_))
    ));
    assert!(matches!(
        session.set_segment_range("a", "New Segment", Some(String::new()), Some(String::new())),
        Err(Error::InvalidSegment(_))
    ));
    assert!(matches!(
        session.add_segments(&[Segment::element(" ")]),
        Err(Error::InvalidSegment(_))
    ));

    let segment = session
        .measurements()
        .get("a")
        .unwrap()
        .segments()
        .get("New Segment")
        .cloned()
        .unwrap();
    assert_eq!(segment.to_input_string(), "New Segment");
    assert_eq!(segment_names(&session, "a"), ["New Segment"]);
}
