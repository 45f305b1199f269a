//! Message ids for every server pair.
//!
//! Naming gives the direction: `CA_` client→account, `AC_` account→client,
//! `CG_` client→game, `GC_` game→client, `GA_` game→account, `AG_`
//! account→game. Replies reuse the request id with a leading error code
//! byte, so each request has a single `*_RESPONSE` twin only where the
//! reply carries more than the code.

// Session (client <-> account).
pub const CA_LOGIN: u16 = 0x0010;
pub const AC_LOGIN_RESPONSE: u16 = 0x0011;
pub const CA_LOGOUT: u16 = 0x0012;
pub const AC_LOGOUT_RESPONSE: u16 = 0x0013;
pub const CA_REGISTER: u16 = 0x0014;
pub const AC_REGISTER_RESPONSE: u16 = 0x0015;
pub const CA_UNREGISTER: u16 = 0x0016;
pub const AC_UNREGISTER_RESPONSE: u16 = 0x0017;
pub const CA_EMAIL_CHANGE: u16 = 0x0018;
pub const AC_EMAIL_CHANGE_RESPONSE: u16 = 0x0019;
pub const CA_PASSWORD_CHANGE: u16 = 0x001a;
pub const AC_PASSWORD_CHANGE_RESPONSE: u16 = 0x001b;
pub const CA_CHAR_CREATE: u16 = 0x0020;
pub const AC_CHAR_CREATE_RESPONSE: u16 = 0x0021;
pub const CA_CHAR_DELETE: u16 = 0x0022;
pub const AC_CHAR_DELETE_RESPONSE: u16 = 0x0023;
pub const CA_CHAR_SELECT: u16 = 0x0024;
pub const AC_CHAR_SELECT_RESPONSE: u16 = 0x0025;
pub const AC_CHAR_INFO: u16 = 0x0026;

// Game session (client <-> game).
pub const CG_CONNECT: u16 = 0x0030;
pub const GC_CONNECT_RESPONSE: u16 = 0x0031;
pub const CG_DISCONNECT: u16 = 0x0032;
pub const GC_MAP_CHANGE: u16 = 0x0033;

// Movement and combat (game).
pub const CG_WALK: u16 = 0x0040;
pub const CG_ATTACK: u16 = 0x0041;
pub const CG_ACTION_CHANGE: u16 = 0x0042;
pub const CG_DIRECTION_CHANGE: u16 = 0x0043;
pub const GC_BEING_ENTER: u16 = 0x0048;
pub const GC_BEING_LEAVE: u16 = 0x0049;
pub const GC_BEINGS_MOVE: u16 = 0x004a;
pub const GC_BEING_ATTACK: u16 = 0x004b;
pub const GC_BEING_ACTION_CHANGE: u16 = 0x004c;
pub const GC_BEING_LOOKS_CHANGE: u16 = 0x004d;
pub const GC_BEING_DIRECTION_CHANGE: u16 = 0x004e;
pub const GC_BEINGS_DAMAGE: u16 = 0x004f;
pub const GC_ATTRIBUTE_UPDATE: u16 = 0x0050;
pub const GC_EXPERIENCE_UPDATE: u16 = 0x0051;
pub const GC_LEVEL_UP: u16 = 0x0052;
pub const GC_LEVEL_PROGRESS: u16 = 0x0053;

// Items (game).
pub const CG_ITEM_PICKUP: u16 = 0x0058;
pub const CG_ITEM_DROP: u16 = 0x0059;
pub const CG_ITEM_USE: u16 = 0x005a;
pub const CG_ITEM_EQUIP: u16 = 0x005b;
pub const CG_ITEM_UNEQUIP: u16 = 0x005c;
pub const GC_INVENTORY_UPDATE: u16 = 0x005d;
pub const GC_EQUIP_UPDATE: u16 = 0x005e;
pub const GC_ITEMS: u16 = 0x005f;
pub const GC_ITEM_APPEAR: u16 = 0x0060;

// Transactions (game).
pub const CG_TRADE_REQUEST: u16 = 0x0068;
pub const GC_TRADE_REQUEST: u16 = 0x0069;
pub const CG_TRADE_START: u16 = 0x006a;
pub const GC_TRADE_START: u16 = 0x006b;
pub const CG_TRADE_ADD_ITEM: u16 = 0x006c;
pub const CG_TRADE_SET_MONEY: u16 = 0x006d;
pub const CG_TRADE_CONFIRM: u16 = 0x006e;
pub const CG_TRADE_AGREE: u16 = 0x006f;
pub const CG_TRADE_CANCEL: u16 = 0x0070;
pub const GC_TRADE_EVENT: u16 = 0x0071;
pub const GC_TRADE_COMPLETE: u16 = 0x0072;
pub const CG_BUYSELL_PERFORM: u16 = 0x0073;
pub const GC_BUYSELL_LIST: u16 = 0x0074;
pub const GC_BUYSELL_RESPONSE: u16 = 0x0075;

// Speech on the game map.
pub const CG_SAY: u16 = 0x0078;
pub const GC_SAY: u16 = 0x0079;

// Chat hub (client <-> account, token-bootstrapped like the game side).
pub const CA_CHAT_CONNECT: u16 = 0x0080;
pub const AC_CHAT_CONNECT_RESPONSE: u16 = 0x0081;
pub const CA_CHANNEL_ENTER: u16 = 0x0082;
pub const AC_CHANNEL_ENTER_RESPONSE: u16 = 0x0083;
pub const CA_CHANNEL_QUIT: u16 = 0x0084;
pub const CA_CHANNEL_LIST: u16 = 0x0085;
pub const AC_CHANNEL_LIST: u16 = 0x0086;
pub const CA_CHANNEL_USERS: u16 = 0x0087;
pub const AC_CHANNEL_USERS: u16 = 0x0088;
pub const CA_CHANNEL_TOPIC: u16 = 0x0089;
pub const CA_CHANNEL_MODE: u16 = 0x008a;
pub const CA_CHANNEL_KICK: u16 = 0x008b;
pub const AC_CHANNEL_EVENT: u16 = 0x008c;
pub const CA_CHAT: u16 = 0x008d;
pub const AC_CHAT: u16 = 0x008e;
pub const CA_PRIVMSG: u16 = 0x008f;
pub const AC_PRIVMSG: u16 = 0x0090;
pub const AC_ANNOUNCE: u16 = 0x0091;

// Guilds and parties (client <-> account).
pub const CA_GUILD_CREATE: u16 = 0x0098;
pub const AC_GUILD_CREATE_RESPONSE: u16 = 0x0099;
pub const CA_GUILD_INVITE: u16 = 0x009a;
pub const AC_GUILD_INVITED: u16 = 0x009b;
pub const CA_GUILD_ACCEPT: u16 = 0x009c;
pub const AC_GUILD_ACCEPT_RESPONSE: u16 = 0x009d;
pub const CA_GUILD_GET_MEMBERS: u16 = 0x009e;
pub const AC_GUILD_MEMBERS: u16 = 0x009f;
pub const CA_GUILD_PROMOTE: u16 = 0x00a0;
pub const CA_GUILD_KICK: u16 = 0x00a1;
pub const CA_GUILD_QUIT: u16 = 0x00a2;
pub const AC_GUILD_REJOIN: u16 = 0x00a3;
pub const AC_GUILD_EVENT: u16 = 0x00a4;
pub const CA_PARTY_INVITE: u16 = 0x00a8;
pub const AC_PARTY_INVITED: u16 = 0x00a9;
pub const CA_PARTY_ACCEPT: u16 = 0x00aa;
pub const AC_PARTY_ACCEPT_RESPONSE: u16 = 0x00ab;
pub const CA_PARTY_QUIT: u16 = 0x00ac;
pub const AC_PARTY_MEMBER_JOINED: u16 = 0x00ad;
pub const AC_PARTY_MEMBER_LEFT: u16 = 0x00ae;

// Inter-server (game <-> account).
pub const GA_REGISTER: u16 = 0x00c0;
pub const AG_REGISTER_RESPONSE: u16 = 0x00c1;
pub const AG_PLAYER_ENTER: u16 = 0x00c2;
pub const GA_PLAYER_DATA: u16 = 0x00c3;
pub const GA_REDIRECT: u16 = 0x00c4;
pub const AG_REDIRECT_RESPONSE: u16 = 0x00c5;
pub const GA_PLAYER_RECONNECT: u16 = 0x00c6;
pub const GA_QUEST_GET_VAR: u16 = 0x00c7;
pub const AG_QUEST_VAR: u16 = 0x00c8;
pub const GA_QUEST_SET_VAR: u16 = 0x00c9;
pub const GA_STATISTICS: u16 = 0x00ca;
pub const GA_BAN_PLAYER: u16 = 0x00cb;
pub const GA_UPDATE_EXPERIENCE: u16 = 0x00cc;
pub const AG_PARTY_CHANGE: u16 = 0x00cd;

// Client redirect between game servers.
pub const GC_REDIRECT: u16 = 0x00d0;
