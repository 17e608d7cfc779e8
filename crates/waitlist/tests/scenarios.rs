//! End-to-end waitlist scenarios against the in-memory store.

mod common;

use anyhow::Result;
use chrono::Duration;
use common::{freed_slot, range, wait_for_status, Harness};
use waitlist::CascadeOutcome;
use waitlist_core::{EntryEventType, EntryStatus};

#[tokio::test]
async fn test_first_in_line_confirms_offer() -> Result<()> {
    let h = Harness::new().await?;
    let a = h.join("user-a", vec![range((9, 0), (12, 0))]).await?;
    let b = h.join("user-b", vec![range((9, 0), (12, 0))]).await?;
    assert_eq!(a.position, 1);
    assert_eq!(b.position, 2);

    let outcome = h.engine.on_slot_freed(freed_slot(10, 0, None)).await?;
    let CascadeOutcome::Offered(offered) = &outcome else {
        anyhow::bail!("expected an offer, got {outcome:?}");
    };
    assert_eq!(offered.id, a.entry.id);
    let offer = offered.available_slot.clone().expect("offer should carry a slot");
    assert_eq!(offer.expires_at, h.clock_now() + Duration::seconds(300));

    h.advance(Duration::minutes(2));
    let booking = h.engine.confirm(&a.entry.id).await?;
    assert_eq!(booking.0, format!("bk-{}", a.entry.id));

    let calls = h.booking.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].user_id, "user-a");

    let confirmed = h.engine.get(&a.entry.id).await?;
    assert_eq!(confirmed.status, EntryStatus::Confirmed);
    assert_eq!(h.engine.get_position(&b.entry.id).await?, Some(1));
    assert_eq!(h.engine.pending_timers().await, 0);

    let events: Vec<EntryEventType> = h
        .engine
        .events(&a.entry.id)
        .await?
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        events,
        vec![EntryEventType::Joined, EntryEventType::Offered, EntryEventType::Confirmed]
    );

    h.engine.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_expired_offer_cascades_to_next_entry() -> Result<()> {
    let h = Harness::new().await?;
    let a = h.join("user-a", vec![range((9, 0), (12, 0))]).await?;
    let b = h.join("user-b", vec![range((9, 0), (12, 0))]).await?;

    h.engine.on_slot_freed(freed_slot(10, 0, None)).await?;
    assert_eq!(h.engine.pending_timers().await, 1);

    h.advance(Duration::seconds(301));
    tokio::time::sleep(std::time::Duration::from_secs(301)).await;

    wait_for_status(&h.engine, &a.entry.id, EntryStatus::Expired).await?;
    let next = wait_for_status(&h.engine, &b.entry.id, EntryStatus::SlotAvailable).await?;

    let offer = next.available_slot.expect("offer should carry a slot");
    assert_eq!(offer.time, common::at(10, 0));
    assert_eq!(offer.expires_at, h.clock_now() + Duration::seconds(300));
    assert!(h.booking.calls().is_empty());

    h.engine.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_slot_freed_offers_once() -> Result<()> {
    let h = Harness::new().await?;
    let a = h.join("user-a", vec![range((9, 0), (12, 0))]).await?;
    let b = h.join("user-b", vec![range((9, 0), (12, 0))]).await?;

    let slot = freed_slot(10, 0, None);
    let (first, second) = tokio::join!(
        h.engine.on_slot_freed(slot.clone()),
        h.engine.on_slot_freed(slot)
    );
    let outcomes = [first?, second?];

    let offered = outcomes
        .iter()
        .filter(|o| matches!(o, CascadeOutcome::Offered(e) if e.id == a.entry.id))
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|o| matches!(o, CascadeOutcome::AlreadyOffered(e) if e.id == a.entry.id))
        .count();
    assert_eq!(offered, 1);
    assert_eq!(duplicates, 1);

    assert_eq!(h.engine.get(&b.entry.id).await?.status, EntryStatus::Waiting);
    assert_eq!(h.engine.stats().await?.slot_available, 1);

    h.engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_positions_shift_when_entry_leaves() -> Result<()> {
    let h = Harness::new().await?;
    let mut ids = Vec::new();
    for user in ["u1", "u2", "u3", "u4", "u5"] {
        ids.push(h.join(user, vec![range((14, 0), (16, 0))]).await?.entry.id);
    }

    let left = h.engine.leave(&ids[2]).await?;
    assert_eq!(left.status, EntryStatus::Cancelled);

    let mut positions = Vec::new();
    for id in &ids {
        positions.push(h.engine.get_position(id).await?);
    }
    assert_eq!(positions, vec![Some(1), Some(2), None, Some(3), Some(4)]);

    h.engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_slot_outside_preferences_is_released() -> Result<()> {
    let h = Harness::new().await?;
    let a = h.join("user-a", vec![range((9, 0), (10, 0))]).await?;

    // Ranges are half-open: 10:00 is outside 09:00-10:00.
    let outcome = h.engine.on_slot_freed(freed_slot(10, 0, None)).await?;
    assert!(matches!(outcome, CascadeOutcome::Released));
    assert_eq!(h.engine.get(&a.entry.id).await?.status, EntryStatus::Waiting);

    h.engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_staff_preference_filters_candidates() -> Result<()> {
    let h = Harness::new().await?;
    let mut request = common::join_request("picky", vec![range((9, 0), (12, 0))]);
    request.staff_id = Some("staff-1".into());
    h.advance(Duration::seconds(1));
    let picky = h.engine.join(request).await?;
    let anyone = h.join("anyone", vec![range((9, 0), (12, 0))]).await?;

    let outcome = h.engine.on_slot_freed(freed_slot(11, 0, Some("staff-2"))).await?;
    let CascadeOutcome::Offered(offered) = &outcome else {
        anyhow::bail!("expected an offer, got {outcome:?}");
    };
    assert_eq!(offered.id, anyone.entry.id);
    assert_eq!(h.engine.get(&picky.entry.id).await?.status, EntryStatus::Waiting);

    h.engine.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirm_and_skip_race_has_one_winner() -> Result<()> {
    let h = Harness::new().await?;
    let a = h.join("user-a", vec![range((9, 0), (12, 0))]).await?;
    h.engine.on_slot_freed(freed_slot(10, 0, None)).await?;

    let (confirmed, skipped) = tokio::join!(h.engine.confirm(&a.entry.id), h.engine.skip(&a.entry.id));
    assert!(confirmed.is_ok() ^ skipped.is_ok());

    let loser = confirmed.err().or_else(|| skipped.err());
    assert!(loser.is_some_and(|e| e.is_expected()));

    let status = h.engine.get(&a.entry.id).await?.status;
    assert!(matches!(status, EntryStatus::Confirmed | EntryStatus::Cancelled));
    assert_eq!(h.engine.stats().await?.slot_available, 0);

    h.engine.shutdown().await;
    Ok(())
}
