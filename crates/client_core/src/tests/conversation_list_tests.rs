use std::{collections::HashSet, sync::atomic::Ordering};

use super::*;
use crate::test_support::{channel, chat_updated, summary, FakeChatApi};

fn ids(list: &ConversationListSynchronizer) -> Vec<&str> {
    list.summaries()
        .iter()
        .map(|summary| summary.conversation_id.as_str())
        .collect()
}

fn unloaded(api: Arc<dyn ChatApi>) -> ConversationListSynchronizer {
    let (mut channel, _rx) = channel();
    ConversationListSynchronizer::new(api, &mut channel)
}

#[tokio::test]
async fn subscribes_on_creation_and_load_sorts() {
    let api = Arc::new(FakeChatApi::default().with_summaries(vec![
        summary("a", Some(10)),
        summary("quiet", None),
        summary("b", Some(20)),
    ]));
    let (mut channel, _rx) = channel();
    let mut list = ConversationListSynchronizer::new(api, &mut channel);
    assert!(channel.is_active(list.subscription()));

    list.load().await.expect("load");
    assert_eq!(ids(&list), vec!["b", "a", "quiet"]);

    list.load().await.expect("reload");
    assert_eq!(channel.registry().subscribers(&Topic::ConversationList).len(), 1);
}

#[tokio::test]
async fn failed_load_keeps_last_known_list() {
    let api = Arc::new(FakeChatApi::default().with_summaries(vec![summary("a", Some(10))]));
    let mut list = unloaded(Arc::clone(&api) as Arc<dyn ChatApi>);
    list.load().await.expect("load");

    api.fail_list.store(true, Ordering::SeqCst);
    let err = list.load().await.expect_err("must fail");
    assert!(matches!(err, ClientError::FetchFailure { .. }));
    assert_eq!(ids(&list), vec!["a"]);
}

#[tokio::test]
async fn update_moves_conversation_to_front() {
    let api = Arc::new(
        FakeChatApi::default().with_summaries(vec![summary("A", Some(10)), summary("B", Some(5))]),
    );
    let mut list = unloaded(api);
    list.load().await.expect("load");
    assert_eq!(ids(&list), vec!["A", "B"]);

    let change = list.apply_update(&chat_updated("B", "m2", "u2", 20, None));
    assert_eq!(change, ListChange::Replaced(ConversationId::new("B")));
    assert_eq!(ids(&list), vec!["B", "A"]);
}

#[test]
fn unknown_conversation_is_inserted() {
    let mut list = unloaded(Arc::new(FakeChatApi::default()));
    let change = list.apply_update(&chat_updated("new", "m1", "u2", 1, None));
    assert_eq!(change, ListChange::Inserted(ConversationId::new("new")));
    assert_eq!(list.summaries().len(), 1);
    assert_eq!(list.summaries()[0].unread_count, 1);
}

#[test]
fn random_update_sequences_stay_sorted_and_unique() {
    let mut list = unloaded(Arc::new(FakeChatApi::default()));
    let mut seed: u64 = 0x5eed;
    let mut next = || {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (seed >> 33) as u32
    };

    for step in 0..500 {
        let conversation = format!("c{}", next() % 12);
        let minute = next() % 60;
        list.apply_update(&chat_updated(
            &conversation,
            &format!("m{step}"),
            "u2",
            minute,
            None,
        ));

        let summaries = list.summaries();
        let unique: HashSet<&ConversationId> =
            summaries.iter().map(|summary| &summary.conversation_id).collect();
        assert_eq!(unique.len(), summaries.len());
        assert!(summaries
            .windows(2)
            .all(|pair| pair[0].last_activity() >= pair[1].last_activity()));
    }
}

#[test]
fn clear_unread_only_reports_real_changes() {
    let mut list = unloaded(Arc::new(FakeChatApi::default()));
    list.apply_update(&chat_updated("c1", "m1", "u2", 1, None));

    assert!(list.clear_unread(&ConversationId::new("c1")));
    assert!(!list.clear_unread(&ConversationId::new("c1")));
    assert!(!list.clear_unread(&ConversationId::new("missing")));
    assert_eq!(
        list.get(&ConversationId::new("c1"))
            .expect("summary")
            .unread_count,
        0
    );
}

#[tokio::test]
async fn delete_calls_api_then_removes_summary() {
    let api = Arc::new(FakeChatApi::default());
    let mut list = unloaded(Arc::clone(&api) as Arc<dyn ChatApi>);
    list.apply_update(&chat_updated("c1", "m1", "u2", 1, None));
    list.apply_update(&chat_updated("c2", "m2", "u2", 2, None));

    list.delete(&ConversationId::new("c1")).await.expect("delete");

    assert_eq!(ids(&list), vec!["c2"]);
    assert_eq!(
        api.deleted.lock().expect("deleted").clone(),
        vec![ConversationId::new("c1")]
    );
}
