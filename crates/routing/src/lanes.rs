//! Per-node lane queues.
//!
//! Each node gets three bounded FIFO queues, one per priority lane. A full
//! lane drops its oldest message and reports the overflow; producers are
//! never blocked.

use std::collections::{HashMap, VecDeque};

use switchyard_protocol::{Lane, LaneMessage};

use crate::error::{Error, Result};

/// Emitted when a full lane dropped its oldest message to admit a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneOverflow {
    pub lane: Lane,
    pub node_id: String,
    pub capacity: usize,
}

#[derive(Default)]
struct NodeLanes {
    steer: VecDeque<LaneMessage>,
    collect: VecDeque<LaneMessage>,
    followup: VecDeque<LaneMessage>,
}

impl NodeLanes {
    fn lane(&self, lane: Lane) -> &VecDeque<LaneMessage> {
        match lane {
            Lane::Steer => &self.steer,
            Lane::Collect => &self.collect,
            Lane::Followup => &self.followup,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut VecDeque<LaneMessage> {
        match lane {
            Lane::Steer => &mut self.steer,
            Lane::Collect => &mut self.collect,
            Lane::Followup => &mut self.followup,
        }
    }

    fn total(&self) -> usize {
        self.steer.len() + self.collect.len() + self.followup.len()
    }
}

pub struct LaneDispatcher {
    nodes: HashMap<String, NodeLanes>,
    capacity: usize,
}

impl LaneDispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wire up queues for a node. Idempotent.
    pub fn add_node(&mut self, node_id: &str) {
        self.nodes.entry(node_id.to_string()).or_default();
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Tear down a node's queues, returning whatever was still queued in
    /// priority order.
    pub fn remove_node(&mut self, node_id: &str) -> Vec<LaneMessage> {
        let Some(mut lanes) = self.nodes.remove(node_id) else {
            return Vec::new();
        };
        let mut remaining = Vec::with_capacity(lanes.total());
        for lane in Lane::ALL {
            remaining.extend(lanes.lane_mut(lane).drain(..));
        }
        remaining
    }

    /// Enqueue a message on its lane. When the lane is at capacity the
    /// oldest message is dropped and the overflow is reported; the queue
    /// size is unchanged in that case.
    pub fn enqueue(&mut self, node_id: &str, msg: LaneMessage) -> Result<Option<LaneOverflow>> {
        let lanes = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        let lane = msg.lane;
        let queue = lanes.lane_mut(lane);
        let mut overflow = None;
        if queue.len() >= self.capacity {
            queue.pop_front();
            overflow = Some(LaneOverflow {
                lane,
                node_id: node_id.to_string(),
                capacity: self.capacity,
            });
        }
        queue.push_back(msg);
        Ok(overflow)
    }

    pub fn queue_size(&self, node_id: &str, lane: Lane) -> usize {
        self.nodes.get(node_id).map_or(0, |l| l.lane(lane).len())
    }

    pub fn total_queued(&self, node_id: &str) -> usize {
        self.nodes.get(node_id).map_or(0, NodeLanes::total)
    }

    /// Pull every queued message for a node in priority order
    /// (steer > collect > followup), leaving the queues empty.
    pub fn drain(&mut self, node_id: &str) -> Vec<LaneMessage> {
        let Some(lanes) = self.nodes.get_mut(node_id) else {
            return Vec::new();
        };
        let mut drained = Vec::with_capacity(lanes.total());
        for lane in Lane::ALL {
            drained.extend(lanes.lane_mut(lane).drain(..));
        }
        drained
    }

    /// Pull every queued message from a single lane.
    pub fn drain_lane(&mut self, node_id: &str, lane: Lane) -> Vec<LaneMessage> {
        self.nodes
            .get_mut(node_id)
            .map(|l| l.lane_mut(lane).drain(..).collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
